//! Virtual touchscreen
//!
//! `Unregistered -> Allocated -> Configured -> Registered -> Unregistered`.
//! The registered handle is published through a [`DeviceSlot`] shared with
//! the poll routine and the sessions; teardown clears the slot before the
//! device is unregistered.

use spin::RwLock;

use crate::drivers::input::{AbsCode, DeviceHandle, EventBits, InputDev, InputSubsystem, KeyCode};
use crate::mm::{GfpFlags, KAddr, Slab};
use crate::util::{KError, KResult};

use super::config::DriverConfig;

/// Where the registered device handle is published
pub struct DeviceSlot {
    handle: RwLock<Option<DeviceHandle>>,
}

impl DeviceSlot {
    pub const fn new() -> Self {
        Self { handle: RwLock::new(None) }
    }

    pub fn set(&self, handle: DeviceHandle) {
        *self.handle.write() = Some(handle);
    }

    pub fn get(&self) -> Option<DeviceHandle> {
        *self.handle.read()
    }

    pub fn clear(&self) -> Option<DeviceHandle> {
        self.handle.write().take()
    }
}

impl Default for DeviceSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unregistered,
    Allocated,
    Configured,
    Registered,
}

/// input_allocate_device / input_register_device / input_unregister_device
pub struct TouchDevice {
    state: DeviceState,
    obj: Option<KAddr>,
    desc: InputDev,
    handle: Option<DeviceHandle>,
}

impl TouchDevice {
    pub fn new() -> Self {
        Self {
            state: DeviceState::Unregistered,
            obj: None,
            desc: InputDev::default(),
            handle: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn handle(&self) -> Option<DeviceHandle> {
        self.handle
    }

    pub fn descriptor(&self) -> &InputDev {
        &self.desc
    }

    pub fn allocate(&mut self, slab: &Slab) -> KResult<()> {
        if self.state != DeviceState::Unregistered {
            return Err(KError::Invalid);
        }
        let obj = slab
            .kzalloc(core::mem::size_of::<InputDev>(), GfpFlags::KERNEL)
            .ok_or(KError::NoMemory)?;
        self.obj = Some(obj);
        self.desc = InputDev::default();
        self.state = DeviceState::Allocated;
        Ok(())
    }

    /// Name, BTN_TOUCH, and both axes over the configured range
    pub fn configure(&mut self, config: &DriverConfig) -> KResult<()> {
        if self.state != DeviceState::Allocated {
            return Err(KError::Invalid);
        }
        self.desc.set_name(config.device_name);
        self.desc.set_evbit(EventBits::KEY | EventBits::ABS);
        self.desc.set_keybit(KeyCode::BtnTouch);
        self.desc.set_abs_params(AbsCode::X, config.abs_min, config.abs_max, 0, 0);
        self.desc.set_abs_params(AbsCode::Y, config.abs_min, config.abs_max, 0, 0);
        self.state = DeviceState::Configured;
        Ok(())
    }

    pub fn register(&mut self, input: &dyn InputSubsystem) -> KResult<DeviceHandle> {
        if self.state != DeviceState::Configured {
            return Err(KError::Invalid);
        }
        let handle = input.register_device(&self.desc)?;
        self.handle = Some(handle);
        self.state = DeviceState::Registered;
        Ok(handle)
    }

    /// Unregister (if registered) and free. Safe in any state.
    pub fn unregister(&mut self, input: &dyn InputSubsystem, slab: &Slab) {
        if let Some(handle) = self.handle.take() {
            input.unregister_device(handle);
        }
        self.free(slab);
    }

    /// input_free_device: drop an allocated but unregistered device
    pub fn free(&mut self, slab: &Slab) {
        if let Some(obj) = self.obj.take() {
            slab.kfree(obj);
        }
        self.desc = InputDev::default();
        self.state = DeviceState::Unregistered;
    }
}

impl Default for TouchDevice {
    fn default() -> Self {
        Self::new()
    }
}
