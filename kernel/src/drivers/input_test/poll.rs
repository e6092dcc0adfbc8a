//! Interrupt-driven coordinate polling
//!
//! Runs from the IRQ handler. Never takes the session lock: it only touches
//! the registers and the input device.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::irq::IrqReturn;
use crate::drivers::input::{AbsCode, InputSubsystem, KeyCode};

use super::device::DeviceSlot;
use super::regs::{RegisterBus, StatusBits, CONTROL, DATA_X, DATA_Y, STATUS};

/// One read of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Touch { x: i32, y: i32 },
    NoTouch,
}

/// Read CONTROL and write the same value back
fn strobe(bus: &dyn RegisterBus) {
    let cast = bus.read_register(CONTROL);
    bus.write_register(CONTROL, cast);
}

/// Read one sample: Y, then X, each behind a strobe, then a final strobe
/// and a second STATUS read for the pen state.
pub fn read_sample(bus: &dyn RegisterBus) -> Sample {
    let status = StatusBits::from_bits_retain(bus.read_register(STATUS));
    if !status.intersects(StatusBits::DATA_READY) {
        return Sample::NoTouch;
    }

    strobe(bus);
    let y = bus.read_register(DATA_Y) as i32;

    strobe(bus);
    let x = bus.read_register(DATA_X) as i32;

    strobe(bus);

    let status = StatusBits::from_bits_retain(bus.read_register(STATUS));
    if status.contains(StatusBits::TOUCH) {
        Sample::Touch { x, y }
    } else {
        Sample::NoTouch
    }
}

pub struct Poller {
    bus: Arc<dyn RegisterBus>,
    input: Arc<dyn InputSubsystem>,
    device: Arc<DeviceSlot>,
    polls: AtomicU64,
}

impl Poller {
    pub fn new(bus: Arc<dyn RegisterBus>, input: Arc<dyn InputSubsystem>, device: Arc<DeviceSlot>) -> Self {
        Self {
            bus,
            input,
            device,
            polls: AtomicU64::new(0),
        }
    }

    /// Sample the controller and report it. `false` if there is no
    /// registered device to report to.
    pub fn pseudo_report_xy(&self) -> bool {
        let Some(dev) = self.device.get() else {
            return false;
        };

        match read_sample(&*self.bus) {
            Sample::Touch { x, y } => {
                self.input.report_key(dev, KeyCode::BtnTouch, true);
                self.input.report_abs(dev, AbsCode::X, x);
                self.input.report_abs(dev, AbsCode::Y, y);
            }
            Sample::NoTouch => {
                self.input.report_key(dev, KeyCode::BtnTouch, false);
            }
        }
        self.input.sync(dev);

        self.polls.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn handle_irq(&self, _irq: u32) -> IrqReturn {
        if self.pseudo_report_xy() {
            IrqReturn::Handled
        } else {
            IrqReturn::None
        }
    }

    /// Samples reported so far
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}
