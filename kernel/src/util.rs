use core::fmt;

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    crate::klog::print(args);
}

/// printk: one log line. Default `LogHook` of the input test driver.
pub fn printk(args: fmt::Arguments) {
    _print(format_args!("{}\n", args));
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ({
        $crate::util::_print(format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(concat!($fmt, "\n"), $($arg)*));
}

pub use crate::kprintln;

/// Oops: falha fatal de kernel.
///
/// Logs the `BUG:` line to the kernel log and unwinds. Used where the
/// faithful driver mode would fault on real hardware.
#[cold]
#[track_caller]
pub fn oops(what: fmt::Arguments) -> ! {
    kprintln!("BUG: {}", what);
    panic!("BUG: {}", what)
}

/// Erros "kernel-level" genéricos para subsistemas (mm, drivers, input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    NotFound,
    AlreadyExists,
    Invalid,
    NoMemory,
    Busy,
    /// Cópia de/para user space falhou.
    Fault,
    /// Request larger than the driver accepts.
    TooBig,
    /// Operation needs data that was never submitted.
    NoData,
    /// Operation invoked with a zero-length operand.
    EmptyOperand,
    NoDevice,
}

impl KError {
    /// Negative errno for the syscall ABI.
    pub const fn errno(self) -> i64 {
        match self {
            KError::NotFound => errno::ENOENT,
            KError::AlreadyExists => errno::EEXIST,
            KError::Invalid | KError::EmptyOperand => errno::EINVAL,
            KError::NoMemory => errno::ENOMEM,
            KError::Busy => errno::EBUSY,
            KError::Fault => errno::EFAULT,
            KError::TooBig => errno::E2BIG,
            KError::NoData => errno::ENODATA,
            KError::NoDevice => errno::ENODEV,
        }
    }
}

pub type KResult<T> = core::result::Result<T, KError>;

/// Erros de syscall (negativo = errno).
pub mod errno {
    pub const ENOENT: i64 = -2;
    pub const E2BIG: i64 = -7;
    pub const ENOMEM: i64 = -12;
    pub const EFAULT: i64 = -14;
    pub const EBUSY: i64 = -16;
    pub const EEXIST: i64 = -17;
    pub const ENODEV: i64 = -19;
    pub const EINVAL: i64 = -22;
    pub const ENODATA: i64 = -61;
}
