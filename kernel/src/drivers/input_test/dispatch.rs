//! Command dispatch
//!
//! The dispatch table is allocated on the first press/release command of a
//! session and lives until the session is released. Its slots select one of
//! a closed set of touch operations ([`TouchOp`]); there are no stored
//! callables to go stale. The press operation reads whatever buffer the
//! session holds at call time.

use alloc::vec::Vec;
use core::fmt;

use crate::drivers::input::{AbsCode, DeviceHandle, InputSubsystem, KeyCode};
use crate::mm::{GfpFlags, KAddr, Slab};
use crate::util::{KError, KResult};

use super::config::{LogHook, Mode};

/// ioctl: replay the buffer as touch coordinates
pub const CMD_PRESS: u32 = 0x1337;
/// ioctl: lift the touch
pub const CMD_RELEASE: u32 = 0x7331;

/// Size of the dispatch record: 392 bytes of padding followed by the log
/// hook, press and release slots.
pub const DISPATCH_TABLE_SIZE: usize = 416;
/// Offset of the press slot inside the record
pub const PRESS_SLOT_OFFSET: u64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Press,
    Release,
    Unknown(u32),
}

impl Command {
    pub fn from_code(code: u32) -> Self {
        match code {
            CMD_PRESS => Command::Press,
            CMD_RELEASE => Command::Release,
            other => Command::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Command::Press => CMD_PRESS,
            Command::Release => CMD_RELEASE,
            Command::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOp {
    ReportPress,
    ReportRelease,
}

#[derive(Clone, Copy)]
pub struct DispatchTable {
    addr: KAddr,
    press: TouchOp,
    release: TouchOp,
    log_hook: LogHook,
}

impl DispatchTable {
    /// Allocate and populate the table, then announce it through the hook.
    /// `None` if the slab is out of memory.
    pub fn allocate(slab: &Slab, log_hook: LogHook) -> Option<Self> {
        let addr = slab.kzalloc(DISPATCH_TABLE_SIZE, GfpFlags::ATOMIC)?;
        let table = Self {
            addr,
            press: TouchOp::ReportPress,
            release: TouchOp::ReportRelease,
            log_hook,
        };
        table.log(format_args!("_fp class allocate"));
        Some(table)
    }

    pub fn addr(&self) -> KAddr {
        self.addr
    }

    pub fn op(&self, cmd: Command) -> Option<TouchOp> {
        match cmd {
            Command::Press => Some(self.press),
            Command::Release => Some(self.release),
            Command::Unknown(_) => None,
        }
    }

    pub fn log(&self, args: fmt::Arguments<'_>) {
        (self.log_hook)(args);
    }

    pub fn log_hook(&self) -> LogHook {
        self.log_hook
    }

    pub fn free(self, slab: &Slab) {
        slab.kfree(self.addr);
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("addr", &self.addr)
            .field("press", &self.press)
            .field("release", &self.release)
            .finish_non_exhaustive()
    }
}

/// Byte-addressable view of the data a press replays
pub trait ByteSource {
    fn byte_at(&self, offset: usize) -> u8;
}

impl ByteSource for Vec<u8> {
    fn byte_at(&self, offset: usize) -> u8 {
        self[offset]
    }
}

/// How a press walks its operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressPolicy {
    /// Read offsets `0..=len` instead of `0..len`
    pub inclusive_end: bool,
    /// Treat each byte as a signed char
    pub sign_extend: bool,
}

impl PressPolicy {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Faithful => Self { inclusive_end: true, sign_extend: true },
            Mode::Hardened => Self { inclusive_end: false, sign_extend: false },
        }
    }
}

/// Where touch operations report to
pub struct TouchTarget<'a> {
    pub input: &'a dyn InputSubsystem,
    pub device: DeviceHandle,
    pub log_hook: LogHook,
}

pub struct Operand<'a> {
    pub source: &'a dyn ByteSource,
    pub len: usize,
    pub policy: PressPolicy,
}

impl TouchOp {
    pub fn run(self, target: &TouchTarget<'_>, operand: Option<Operand<'_>>) -> KResult<()> {
        match self {
            TouchOp::ReportPress => {
                let operand = operand.ok_or(KError::NoData)?;
                report_touch_press(target, &operand)
            }
            TouchOp::ReportRelease => {
                report_touch_release(target);
                Ok(())
            }
        }
    }
}

/// Press, then one coordinate pair per byte: both axes get the same value.
pub fn report_touch_press(target: &TouchTarget<'_>, operand: &Operand<'_>) -> KResult<()> {
    if operand.len == 0 {
        (target.log_hook)(format_args!("len error"));
        return Err(KError::EmptyOperand);
    }

    let reads = if operand.policy.inclusive_end {
        operand.len + 1
    } else {
        operand.len
    };

    let input = target.input;
    input.report_key(target.device, KeyCode::BtnTouch, true);
    for i in 0..reads {
        let raw = operand.source.byte_at(i);
        let value = if operand.policy.sign_extend {
            raw as i8 as i32
        } else {
            raw as i32
        };
        input.report_abs(target.device, AbsCode::X, value);
        input.report_abs(target.device, AbsCode::Y, value);
        input.sync(target.device);
    }

    Ok(())
}

pub fn report_touch_release(target: &TouchTarget<'_>) {
    target.input.report_key(target.device, KeyCode::BtnTouch, false);
    target.input.sync(target.device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::input::{EventBits, EventType, InputCore, InputDev};
    use alloc::string::{String, ToString};
    use std::cell::RefCell;

    std::thread_local! {
        static LINES: RefCell<Vec<String>> = RefCell::new(Vec::new());
    }

    fn capture(args: fmt::Arguments<'_>) {
        LINES.with(|l| l.borrow_mut().push(args.to_string()));
    }

    fn captured() -> Vec<String> {
        LINES.with(|l| l.borrow().clone())
    }

    fn touch_core() -> (InputCore, DeviceHandle) {
        let core = InputCore::new();
        let mut dev = InputDev::default();
        dev.set_name("dispatch test");
        dev.set_evbit(EventBits::KEY | EventBits::ABS);
        dev.set_keybit(KeyCode::BtnTouch);
        dev.set_abs_params(AbsCode::X, 0, 255, 0, 0);
        dev.set_abs_params(AbsCode::Y, 0, 255, 0, 0);
        let handle = core.register_device(&dev).unwrap();
        (core, handle)
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::from_code(0x1337), Command::Press);
        assert_eq!(Command::from_code(0x7331), Command::Release);
        assert_eq!(Command::from_code(42), Command::Unknown(42));
        assert_eq!(Command::Release.code(), CMD_RELEASE);
    }

    #[test]
    fn test_table_allocation_logs_once() {
        let slab = Slab::default();
        let table = DispatchTable::allocate(&slab, capture).unwrap();
        assert_eq!(slab.ksize(table.addr()), Some(DISPATCH_TABLE_SIZE));
        assert_eq!(table.op(Command::Press), Some(TouchOp::ReportPress));
        assert_eq!(table.op(Command::Release), Some(TouchOp::ReportRelease));
        assert_eq!(table.op(Command::Unknown(1)), None);
        assert_eq!(captured(), ["_fp class allocate"]);

        table.free(&slab);
        assert!(!slab.is_live(table.addr()));
    }

    #[test]
    fn test_table_allocation_failure() {
        let slab = Slab::default();
        slab.inject_failures(1);
        assert!(DispatchTable::allocate(&slab, capture).is_none());
    }

    #[test]
    fn test_inclusive_press_reads_one_past() {
        let (core, dev) = touch_core();
        let target = TouchTarget { input: &core, device: dev, log_hook: capture };
        // Sixth byte stands in for whatever sits past the string.
        let data = vec![10u8, 20, 30, 40, 50, 0];
        let operand = Operand {
            source: &data,
            len: 5,
            policy: PressPolicy::for_mode(Mode::Faithful),
        };
        report_touch_press(&target, &operand).unwrap();

        let c = core.device(dev).unwrap().counters();
        assert_eq!(c.key_down, 1);
        assert_eq!(c.abs_x, 6);
        assert_eq!(c.abs_y, 6);
        assert_eq!(c.syncs, 6);
    }

    #[test]
    fn test_exclusive_press_reads_len() {
        let (core, dev) = touch_core();
        let target = TouchTarget { input: &core, device: dev, log_hook: capture };
        let data = vec![10u8, 20, 30, 40, 50];
        let operand = Operand {
            source: &data,
            len: 5,
            policy: PressPolicy::for_mode(Mode::Hardened),
        };
        TouchOp::ReportPress.run(&target, Some(operand)).unwrap();

        let events = core.device(dev).unwrap().drain();
        let xs: Vec<i32> = events
            .iter()
            .filter(|e| e.event_type == EventType::Abs as u16 && e.code == AbsCode::X as u16)
            .map(|e| e.value)
            .collect();
        assert_eq!(xs, [10, 20, 30, 40, 50]);
        assert!(events.last().unwrap().is_syn());
    }

    #[test]
    fn test_sign_extension() {
        let (core, dev) = touch_core();
        let target = TouchTarget { input: &core, device: dev, log_hook: capture };
        let data = vec![200u8, 0];
        let faithful = Operand {
            source: &data,
            len: 1,
            policy: PressPolicy::for_mode(Mode::Faithful),
        };
        report_touch_press(&target, &faithful).unwrap();
        let hardened = Operand {
            source: &data,
            len: 1,
            policy: PressPolicy::for_mode(Mode::Hardened),
        };
        report_touch_press(&target, &hardened).unwrap();

        let values: Vec<i32> = core
            .device(dev)
            .unwrap()
            .drain()
            .iter()
            .filter(|e| e.event_type == EventType::Abs as u16 && e.code == AbsCode::Y as u16)
            .map(|e| e.value)
            .collect();
        assert_eq!(values, [-56, 0, 200]);
    }

    #[test]
    fn test_empty_operand_reports_nothing() {
        let (core, dev) = touch_core();
        let target = TouchTarget { input: &core, device: dev, log_hook: capture };
        let data: Vec<u8> = Vec::new();
        let operand = Operand {
            source: &data,
            len: 0,
            policy: PressPolicy::for_mode(Mode::Faithful),
        };
        assert_eq!(report_touch_press(&target, &operand), Err(KError::EmptyOperand));
        assert!(!core.device(dev).unwrap().has_events());
        assert!(captured().iter().any(|l| l == "len error"));
    }

    #[test]
    fn test_press_without_operand() {
        let (core, dev) = touch_core();
        let target = TouchTarget { input: &core, device: dev, log_hook: capture };
        assert_eq!(TouchOp::ReportPress.run(&target, None), Err(KError::NoData));
    }

    #[test]
    fn test_release_is_key_up_then_sync() {
        let (core, dev) = touch_core();
        let target = TouchTarget { input: &core, device: dev, log_hook: capture };
        TouchOp::ReportRelease.run(&target, None).unwrap();

        let events = core.device(dev).unwrap().drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Key as u16);
        assert_eq!(events[0].code, KeyCode::BtnTouch as u16);
        assert_eq!(events[0].value, 0);
        assert!(events[1].is_syn());
    }
}
