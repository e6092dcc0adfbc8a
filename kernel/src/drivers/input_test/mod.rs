//! Virtual touchscreen test driver
//!
//! Misc device `/dev/input_test_driver` plus a virtual touchscreen fed from
//! two independent producers:
//!
//! - the control surface ([`session::Session`]): `write` retains a buffer,
//!   `ioctl(0x1337)` replays it as touch coordinates, `ioctl(0x7331)` lifts
//!   the touch;
//! - the IRQ handler ([`poll::Poller`]): samples the controller registers on
//!   every interrupt on [`TEST_IRQ`].
//!
//! ## Bring-up
//! misc device -> IRQ -> allocate/configure/register the input device.
//! A failed step unwinds the previous ones in reverse.
//!
//! ## Teardown
//! misc device -> IRQ -> input device, so neither producer can reach the
//! device once it is being unregistered.

pub mod buffer;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod poll;
pub mod regs;
pub mod session;

use alloc::sync::Arc;
use spin::Mutex;

use crate::arch::irq::{InterruptController, IrqHandler};
use crate::drivers::input::{DeviceHandle, InputSubsystem};
use crate::drivers::misc::MiscRegistrar;
use crate::kprintln;
use crate::mm::Slab;
use crate::util::{KError, KResult};

pub use buffer::{InputBuffer, SizeBranch, SizePlan};
pub use config::{DriverConfig, LogHook, Mode};
pub use device::{DeviceSlot, DeviceState, TouchDevice};
pub use dispatch::{Command, DispatchTable, TouchOp, CMD_PRESS, CMD_RELEASE};
pub use poll::{Poller, Sample};
pub use regs::{RegisterBus, SimulatedPanel};
pub use session::Session;

/// IRQ line of the touch controller
pub const TEST_IRQ: u32 = 0x1337;

pub const X_AXIS_MIN: i32 = 0;
pub const X_AXIS_MAX: i32 = 255;
pub const Y_AXIS_MIN: i32 = X_AXIS_MIN;
pub const Y_AXIS_MAX: i32 = X_AXIS_MAX;

/// Name the IRQ line is requested under
const IRQ_NAME: &str = "test";

/// Kernel services the driver binds to
#[derive(Clone)]
pub struct Platform {
    pub input: Arc<dyn InputSubsystem>,
    pub misc: Arc<dyn MiscRegistrar>,
    pub irq: Arc<dyn InterruptController>,
    pub bus: Arc<dyn RegisterBus>,
    pub slab: Arc<Slab>,
}

pub struct InputTestDriver {
    config: DriverConfig,
    platform: Platform,
    session: Arc<Session>,
    poller: Arc<Poller>,
    device: TouchDevice,
    slot: Arc<DeviceSlot>,
    minor: u8,
}

impl InputTestDriver {
    pub fn init(config: DriverConfig, platform: Platform) -> KResult<Self> {
        let slot = Arc::new(DeviceSlot::new());
        let session = Arc::new(Session::new(
            config.clone(),
            Arc::clone(&platform.slab),
            Arc::clone(&platform.input),
            Arc::clone(&slot),
        ));

        let minor = platform
            .misc
            .misc_register(config.misc_name, session.clone())
            .inspect_err(|_| kprintln!("misc_register(): Misc device register failed"))?;

        let poller = Arc::new(Poller::new(
            Arc::clone(&platform.bus),
            Arc::clone(&platform.input),
            Arc::clone(&slot),
        ));
        let irq_poller = Arc::clone(&poller);
        let handler: IrqHandler = Arc::new(move |irq| irq_poller.handle_irq(irq));
        if let Err(e) = platform.irq.request_irq(config.irq, IRQ_NAME, handler) {
            kprintln!("request_irq(): can't allocate irq");
            platform.misc.misc_deregister(minor);
            return Err(e);
        }

        let device = match Self::bring_up_device(&config, &platform) {
            Ok(device) => device,
            Err(e) => {
                platform.irq.free_irq(config.irq);
                platform.misc.misc_deregister(minor);
                return Err(e);
            }
        };
        if let Some(handle) = device.handle() {
            slot.set(handle);
        }

        kprintln!(
            "input_test_driver: minor {} irq {:#x} {:?}",
            minor,
            config.irq,
            config.mode
        );

        Ok(Self {
            config,
            platform,
            session,
            poller,
            device,
            slot,
            minor,
        })
    }

    /// Allocate, configure and register; frees the device on failure.
    fn bring_up_device(config: &DriverConfig, platform: &Platform) -> KResult<TouchDevice> {
        let mut device = TouchDevice::new();
        device
            .allocate(&platform.slab)
            .inspect_err(|_| kprintln!("input_allocate_device(): Not enough memory"))?;

        let registered = device
            .configure(config)
            .and_then(|()| device.register(&*platform.input));
        if let Err(e) = registered {
            kprintln!("input_register_device(): Failed to register device");
            device.free(&platform.slab);
            return Err(e);
        }
        Ok(device)
    }

    pub fn exit(mut self) {
        self.platform.misc.misc_deregister(self.minor);
        self.platform.irq.free_irq(self.config.irq);
        self.slot.clear();
        self.device.unregister(&*self.platform.input, &self.platform.slab);
        // Files still open keep the session; drop what it retained.
        let _ = self.session.release();
        kprintln!("input_test_driver: unloaded");
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.slot.get()
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }
}

// =============================================================================
// Global Instance
// =============================================================================

static DRIVER: Mutex<Option<InputTestDriver>> = Mutex::new(None);

/// Load the driver. `Busy` if it is already loaded.
pub fn module_init(config: DriverConfig, platform: Platform) -> KResult<()> {
    let mut driver = DRIVER.lock();
    if driver.is_some() {
        return Err(KError::Busy);
    }
    *driver = Some(InputTestDriver::init(config, platform)?);
    Ok(())
}

/// Unload the driver if loaded
pub fn module_exit() {
    let driver = DRIVER.lock().take();
    if let Some(driver) = driver {
        driver.exit();
    }
}

pub fn is_loaded() -> bool {
    DRIVER.lock().is_some()
}

/// Run `f` against the loaded driver
pub fn with_driver<R>(f: impl FnOnce(&InputTestDriver) -> R) -> Option<R> {
    DRIVER.lock().as_ref().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::irq::{IrqReturn, IrqTable};
    use crate::drivers::input::InputCore;
    use crate::drivers::misc::{FileOperations, MiscRegistry};
    use alloc::vec::Vec;

    struct Host {
        input: Arc<InputCore>,
        misc: Arc<MiscRegistry>,
        irq: Arc<IrqTable>,
        panel: Arc<SimulatedPanel>,
        slab: Arc<Slab>,
    }

    impl Host {
        fn new() -> Self {
            Self {
                input: Arc::new(InputCore::new()),
                misc: Arc::new(MiscRegistry::new()),
                irq: Arc::new(IrqTable::new()),
                panel: Arc::new(SimulatedPanel::new()),
                slab: Arc::new(Slab::default()),
            }
        }

        fn platform(&self) -> Platform {
            Platform {
                input: self.input.clone(),
                misc: self.misc.clone(),
                irq: self.irq.clone(),
                bus: self.panel.clone(),
                slab: self.slab.clone(),
            }
        }

        fn assert_unwound(&self) {
            assert_eq!(self.misc.device_count(), 0);
            assert!(!self.irq.is_registered(TEST_IRQ));
            assert_eq!(self.input.device_count(), 0);
            assert_eq!(self.slab.stats().live_objects, 0);
        }
    }

    #[test]
    fn test_full_flow() {
        let host = Host::new();
        let driver = InputTestDriver::init(DriverConfig::hardened(), host.platform()).unwrap();
        assert_eq!(driver.minor(), 63);
        assert_eq!(host.irq.owner(TEST_IRQ), Some("test"));
        let touch = host.input.find_by_name("V4bel Touchscreen Test").unwrap();
        assert_eq!(driver.device_handle(), Some(touch.handle()));

        let file = host.misc.open("input_test_driver").unwrap();
        file.write(b"\x05\x06\x07").unwrap();
        file.ioctl(CMD_PRESS, 0).unwrap();
        file.ioctl(CMD_RELEASE, 0).unwrap();

        host.panel.touch(40, 50);
        assert_eq!(host.irq.raise(TEST_IRQ), IrqReturn::Handled);
        assert_eq!(driver.poller().polls(), 1);

        let c = touch.counters();
        assert_eq!((c.key_down, c.key_up), (2, 1));
        assert_eq!((c.abs_x, c.abs_y, c.syncs), (4, 4, 5));
        file.close().unwrap();

        driver.exit();
        host.assert_unwound();
        assert_eq!(host.irq.raise(TEST_IRQ), IrqReturn::None);
    }

    #[test]
    fn test_irq_runs_while_session_lock_is_held() {
        let host = Host::new();
        let driver = InputTestDriver::init(DriverConfig::hardened(), host.platform()).unwrap();
        let touch = host.input.find_by_name("V4bel Touchscreen Test").unwrap();

        let held = driver.session().shared_lock().lock();
        host.panel.touch(7, 9);
        assert_eq!(host.irq.raise(TEST_IRQ), IrqReturn::Handled);
        assert_eq!(driver.poller().polls(), 1);
        drop(held);

        let events: Vec<(u16, u16, i32)> = touch
            .drain()
            .iter()
            .map(|e| (e.event_type, e.code, e.value))
            .collect();
        assert_eq!(events, [(1, 0x14a, 1), (3, 0, 7), (3, 1, 9), (0, 0, 0)]);

        driver.exit();
    }

    #[test]
    fn test_irq_interleaves_with_control_surface() {
        const ROUNDS: u64 = 100;

        let host = Host::new();
        let driver = InputTestDriver::init(DriverConfig::hardened(), host.platform()).unwrap();
        let touch = host.input.find_by_name("V4bel Touchscreen Test").unwrap();
        host.panel.touch(200, 100);

        std::thread::scope(|s| {
            let session = driver.session();
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    session.write(crate::mm::UserSlice::new(b"\x01\x02"), 2).unwrap();
                    session.ioctl(CMD_PRESS, 0).unwrap();
                    session.ioctl(CMD_RELEASE, 0).unwrap();
                }
            });
            let irq = &host.irq;
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    assert_eq!(irq.raise(TEST_IRQ), IrqReturn::Handled);
                }
            });
        });

        assert_eq!(driver.poller().polls(), ROUNDS);
        let c = touch.counters();
        assert_eq!(c.key_down, 2 * ROUNDS);
        assert_eq!(c.key_up, ROUNDS);
        assert_eq!(c.abs_x, 3 * ROUNDS);
        assert_eq!(c.abs_y, 3 * ROUNDS);
        assert_eq!(c.syncs, 4 * ROUNDS);
        assert_eq!(c.filtered, 0);

        driver.exit();
        host.assert_unwound();
    }

    #[test]
    fn test_exit_releases_open_session() {
        let host = Host::new();
        let driver = InputTestDriver::init(DriverConfig::faithful(), host.platform()).unwrap();
        let session = driver.session().clone();
        FileOperations::write(&*session, crate::mm::UserSlice::new(b"left"), 4).unwrap();
        driver.exit();
        assert!(session.buffer().is_none());
        host.assert_unwound();
    }

    #[test]
    fn test_unwind_on_device_registration_failure() {
        let host = Host::new();
        host.input.fail_next_registration();
        let res = InputTestDriver::init(DriverConfig::default(), host.platform());
        assert_eq!(res.err(), Some(KError::NoMemory));
        host.assert_unwound();
        assert_eq!(host.slab.stats().double_frees, 0);
    }

    #[test]
    fn test_unwind_on_device_allocation_failure() {
        let host = Host::new();
        host.slab.inject_failures(1);
        let res = InputTestDriver::init(DriverConfig::default(), host.platform());
        assert_eq!(res.err(), Some(KError::NoMemory));
        host.assert_unwound();
    }

    #[test]
    fn test_unwind_on_busy_irq() {
        let host = Host::new();
        host.irq.reserve(TEST_IRQ);
        let res = InputTestDriver::init(DriverConfig::default(), host.platform());
        assert_eq!(res.err(), Some(KError::Busy));
        assert_eq!(host.misc.device_count(), 0);
        assert_eq!(host.input.device_count(), 0);
    }

    #[test]
    fn test_misc_failure_stops_bring_up() {
        let host = Host::new();
        host.misc.fail_next_registration();
        let res = InputTestDriver::init(DriverConfig::default(), host.platform());
        assert_eq!(res.err().map(KError::errno), Some(-16));
        host.assert_unwound();
    }

    // Teardown order through recording collaborators

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct RecordingIrq {
        inner: IrqTable,
        journal: Journal,
    }

    impl InterruptController for RecordingIrq {
        fn request_irq(&self, irq: u32, name: &'static str, handler: IrqHandler) -> KResult<()> {
            self.inner.request_irq(irq, name, handler)
        }

        fn free_irq(&self, irq: u32) {
            self.journal.lock().push("free_irq");
            self.inner.free_irq(irq);
        }
    }

    struct RecordingMisc {
        inner: MiscRegistry,
        journal: Journal,
    }

    impl MiscRegistrar for RecordingMisc {
        fn misc_register(&self, name: &'static str, fops: Arc<dyn FileOperations>) -> KResult<u8> {
            self.inner.misc_register(name, fops)
        }

        fn misc_deregister(&self, minor: u8) {
            self.journal.lock().push("misc_deregister");
            self.inner.misc_deregister(minor);
        }
    }

    struct RecordingInput {
        inner: InputCore,
        journal: Journal,
    }

    impl InputSubsystem for RecordingInput {
        fn register_device(&self, dev: &crate::drivers::input::InputDev) -> KResult<DeviceHandle> {
            self.inner.register_device(dev)
        }

        fn unregister_device(&self, handle: DeviceHandle) {
            self.journal.lock().push("unregister_device");
            self.inner.unregister_device(handle);
        }

        fn report(
            &self,
            handle: DeviceHandle,
            event_type: crate::drivers::input::EventType,
            code: u16,
            value: i32,
        ) {
            self.inner.report(handle, event_type, code, value);
        }
    }

    #[test]
    fn test_teardown_order() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let platform = Platform {
            input: Arc::new(RecordingInput { inner: InputCore::new(), journal: journal.clone() }),
            misc: Arc::new(RecordingMisc { inner: MiscRegistry::new(), journal: journal.clone() }),
            irq: Arc::new(RecordingIrq { inner: IrqTable::new(), journal: journal.clone() }),
            bus: Arc::new(SimulatedPanel::new()),
            slab: Arc::new(Slab::default()),
        };

        InputTestDriver::init(DriverConfig::default(), platform).unwrap().exit();
        assert_eq!(*journal.lock(), ["misc_deregister", "free_irq", "unregister_device"]);
    }

    #[test]
    fn test_unwind_order_on_registration_failure() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let input = RecordingInput { inner: InputCore::new(), journal: journal.clone() };
        input.inner.fail_next_registration();
        let platform = Platform {
            input: Arc::new(input),
            misc: Arc::new(RecordingMisc { inner: MiscRegistry::new(), journal: journal.clone() }),
            irq: Arc::new(RecordingIrq { inner: IrqTable::new(), journal: journal.clone() }),
            bus: Arc::new(SimulatedPanel::new()),
            slab: Arc::new(Slab::default()),
        };

        assert!(InputTestDriver::init(DriverConfig::default(), platform).is_err());
        // Never registered, so never unregistered
        assert_eq!(*journal.lock(), ["free_irq", "misc_deregister"]);
    }

    #[test]
    fn test_module_init_exit() {
        let host = Host::new();
        assert!(!is_loaded());
        module_init(DriverConfig::hardened(), host.platform()).unwrap();
        assert_eq!(
            module_init(DriverConfig::hardened(), host.platform()),
            Err(KError::Busy)
        );
        assert_eq!(with_driver(|d| d.config().mode), Some(Mode::Hardened));
        assert!(crate::klog::contains("input: V4bel Touchscreen Test as /dev/input/event"));

        module_exit();
        module_exit();
        assert!(!is_loaded());
        assert_eq!(with_driver(|d| d.minor()), None);
        host.assert_unwound();
    }
}
