//! Driver configuration

use core::fmt;

use super::{TEST_IRQ, X_AXIS_MAX, X_AXIS_MIN};

/// Log line sink. Receives one line without the trailing newline.
pub type LogHook = fn(fmt::Arguments<'_>);

/// How the buffer/dispatch engine treats its known hazards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bug-for-bug: the lock is re-created on open, a stale buffer survives
    /// allocation failure, lengths come from a terminator scan, the press
    /// loop reads one past the end and a missing buffer oopses.
    Faithful,
    /// Lock created once, tracked lengths, bounded press loop, every hazard
    /// reported as an error.
    Hardened,
}

/// Configuration for the input test driver
#[derive(Clone)]
pub struct DriverConfig {
    pub mode: Mode,
    /// Misc device name (/dev/<misc_name>)
    pub misc_name: &'static str,
    /// Name of the virtual touchscreen
    pub device_name: &'static str,
    /// IRQ line of the touch controller
    pub irq: u32,
    /// Range of both absolute axes
    pub abs_min: i32,
    pub abs_max: i32,
    /// Diagnostics sink, also captured by the dispatch table
    pub log_hook: LogHook,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Hardened,
            misc_name: "input_test_driver",
            device_name: "V4bel Touchscreen Test",
            irq: TEST_IRQ,
            abs_min: X_AXIS_MIN,
            abs_max: X_AXIS_MAX,
            log_hook: crate::util::printk,
        }
    }
}

impl DriverConfig {
    pub fn faithful() -> Self {
        Self { mode: Mode::Faithful, ..Self::default() }
    }

    pub fn hardened() -> Self {
        Self { mode: Mode::Hardened, ..Self::default() }
    }

    pub fn with_log_hook(mut self, hook: LogHook) -> Self {
        self.log_hook = hook;
        self
    }

    pub fn is_faithful(&self) -> bool {
        self.mode == Mode::Faithful
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("mode", &self.mode)
            .field("misc_name", &self.misc_name)
            .field("device_name", &self.device_name)
            .field("irq", &self.irq)
            .field("abs_min", &self.abs_min)
            .field("abs_max", &self.abs_max)
            .finish_non_exhaustive()
    }
}
