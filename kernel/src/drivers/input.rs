//! Input Event System (/dev/input/eventN)
//!
//! Provides a Linux-like input event interface. Drivers describe a device
//! with an [`InputDev`] (name, supported event types, keys, absolute axes),
//! register it through an [`InputSubsystem`] and then `report` / `sync`
//! events against the returned handle.
//!
//! [`InputCore`] is the in-kernel subsystem: it queues events per device in
//! the `struct input_event` layout and drops events the device never
//! declared.

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use spin::Mutex;

use crate::util::{KError, KResult};

/// Input event type (matches Linux input.h)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Synchronization event
    Syn = 0x00,
    /// Key/button event
    Key = 0x01,
    /// Relative movement (mouse)
    Rel = 0x02,
    /// Absolute position (touchscreen, tablet)
    Abs = 0x03,
}

impl EventType {
    fn bit(self) -> EventBits {
        EventBits::from_bits_retain(1 << self as u16)
    }
}

bitflags! {
    /// Supported event types (evbit)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventBits: u32 {
        const SYN = 1 << 0x00;
        const KEY = 1 << 0x01;
        const REL = 1 << 0x02;
        const ABS = 1 << 0x03;
    }
}

/// Synchronization codes
#[repr(u16)]
#[derive(Debug, Clone, Copy)]
pub enum SynCode {
    Report = 0,
    Config = 1,
    MtReport = 2,
    Dropped = 3,
}

/// Key codes (partial list matching Linux)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    BtnLeft = 0x110,
    BtnRight = 0x111,
    BtnMiddle = 0x112,
    BtnToolPen = 0x140,
    BtnToolFinger = 0x145,
    BtnTouch = 0x14a,
    BtnStylus = 0x14b,
}

/// Absolute axis codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsCode {
    X = 0x00,
    Y = 0x01,
    Pressure = 0x18,
}

/// Axis parameters (input_absinfo)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsInfo {
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
}

/// Input event structure (matches Linux struct input_event)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    /// Timestamp seconds
    pub sec: i64,
    /// Timestamp microseconds
    pub usec: i64,
    /// Event type
    pub event_type: u16,
    /// Event code (key code, axis, etc.)
    pub code: u16,
    /// Event value (1=press, 0=release, absolute position, etc.)
    pub value: i32,
}

impl InputEvent {
    pub fn new(event_type: u16, code: u16, value: i32, time_us: u64) -> Self {
        Self {
            sec: (time_us / 1_000_000) as i64,
            usec: (time_us % 1_000_000) as i64,
            event_type,
            code,
            value,
        }
    }

    /// Get size of event in bytes
    pub const fn size() -> usize {
        core::mem::size_of::<InputEvent>()
    }

    /// Convert to bytes
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut bytes = [0u8; 24];
        bytes[0..8].copy_from_slice(&self.sec.to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.usec.to_ne_bytes());
        bytes[16..18].copy_from_slice(&self.event_type.to_ne_bytes());
        bytes[18..20].copy_from_slice(&self.code.to_ne_bytes());
        bytes[20..24].copy_from_slice(&self.value.to_ne_bytes());
        bytes
    }

    pub fn is_syn(&self) -> bool {
        self.event_type == EventType::Syn as u16
    }
}

/// Device description handed to the subsystem at registration
#[derive(Debug, Clone, Default)]
pub struct InputDev {
    pub name: String,
    pub evbit: EventBits,
    pub keybit: BTreeSet<u16>,
    pub absinfo: BTreeMap<u16, AbsInfo>,
}

impl Default for EventBits {
    fn default() -> Self {
        EventBits::empty()
    }
}

impl InputDev {
    pub fn set_name(&mut self, name: &str) {
        self.name = String::from(name);
    }

    pub fn set_evbit(&mut self, bits: EventBits) {
        self.evbit |= bits;
    }

    pub fn set_keybit(&mut self, key: KeyCode) {
        self.keybit.insert(key as u16);
    }

    /// input_set_abs_params: also marks the device as ABS-capable
    pub fn set_abs_params(&mut self, axis: AbsCode, minimum: i32, maximum: i32, fuzz: i32, flat: i32) {
        self.evbit |= EventBits::ABS;
        self.absinfo.insert(axis as u16, AbsInfo { minimum, maximum, fuzz, flat });
    }

    fn supports(&self, event_type: EventType, code: u16) -> bool {
        match event_type {
            EventType::Syn => true,
            EventType::Key => self.evbit.contains(EventType::Key.bit()) && self.keybit.contains(&code),
            EventType::Abs => self.evbit.contains(EventType::Abs.bit()) && self.absinfo.contains_key(&code),
            EventType::Rel => self.evbit.contains(EventType::Rel.bit()),
        }
    }
}

/// Handle returned by `register_device`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceHandle(pub u32);

/// What a driver consumes from the input subsystem
pub trait InputSubsystem: Send + Sync {
    fn register_device(&self, dev: &InputDev) -> KResult<DeviceHandle>;

    fn unregister_device(&self, handle: DeviceHandle);

    fn report(&self, handle: DeviceHandle, event_type: EventType, code: u16, value: i32);

    /// Marks the end of an event batch
    fn sync(&self, handle: DeviceHandle) {
        self.report(handle, EventType::Syn, SynCode::Report as u16, 0);
    }

    fn report_key(&self, handle: DeviceHandle, key: KeyCode, pressed: bool) {
        self.report(handle, EventType::Key, key as u16, pressed as i32);
    }

    fn report_abs(&self, handle: DeviceHandle, axis: AbsCode, value: i32) {
        self.report(handle, EventType::Abs, axis as u16, value);
    }
}

/// Events accepted per device since registration
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventCounters {
    pub key_down: u64,
    pub key_up: u64,
    pub abs_x: u64,
    pub abs_y: u64,
    pub syncs: u64,
    /// Events for types/codes the device never declared
    pub filtered: u64,
    /// Events lost because the queue was full
    pub overruns: u64,
}

/// Maximum queued events per device
pub const EVENT_QUEUE_LEN: usize = 2048;

/// Input event device
pub struct InputDevice {
    handle: DeviceHandle,
    desc: InputDev,
    /// Event queue
    events: Mutex<VecDeque<InputEvent>>,
    counters: Mutex<EventCounters>,
}

impl InputDevice {
    fn new(handle: DeviceHandle, desc: InputDev) -> Self {
        Self {
            handle,
            desc,
            events: Mutex::new(VecDeque::new()),
            counters: Mutex::new(EventCounters::default()),
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn descriptor(&self) -> &InputDev {
        &self.desc
    }

    /// Queue an event
    fn queue_event(&self, event: InputEvent) {
        let mut counters = self.counters.lock();
        let mut events = self.events.lock();
        if events.len() < EVENT_QUEUE_LEN {
            events.push_back(event);
        } else {
            counters.overruns += 1;
        }
    }

    fn accept(&self, event_type: EventType, code: u16, value: i32, time_us: u64) {
        if !self.desc.supports(event_type, code) {
            self.counters.lock().filtered += 1;
            return;
        }

        {
            let mut c = self.counters.lock();
            match event_type {
                EventType::Syn => c.syncs += 1,
                EventType::Key if value != 0 => c.key_down += 1,
                EventType::Key => c.key_up += 1,
                EventType::Abs if code == AbsCode::X as u16 => c.abs_x += 1,
                EventType::Abs if code == AbsCode::Y as u16 => c.abs_y += 1,
                _ => {}
            }
        }

        self.queue_event(InputEvent::new(event_type as u16, code, value, time_us));
    }

    /// Read events (returns number of bytes read)
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let event_size = InputEvent::size();
        let max_events = buf.len() / event_size;
        let mut bytes_read = 0;
        let mut events = self.events.lock();

        for _ in 0..max_events {
            if let Some(event) = events.pop_front() {
                let event_bytes = event.to_bytes();
                buf[bytes_read..bytes_read + event_size].copy_from_slice(&event_bytes);
                bytes_read += event_size;
            } else {
                break;
            }
        }

        bytes_read
    }

    /// Take every queued event
    pub fn drain(&self) -> Vec<InputEvent> {
        self.events.lock().drain(..).collect()
    }

    /// Check if there are events available
    pub fn has_events(&self) -> bool {
        !self.events.lock().is_empty()
    }

    pub fn counters(&self) -> EventCounters {
        *self.counters.lock()
    }
}

/// In-kernel input subsystem
pub struct InputCore {
    devices: Mutex<BTreeMap<u32, Arc<InputDevice>>>,
    next_id: AtomicU32,
    fail_next_register: AtomicBool,
    clock: fn() -> u64,
}

fn zero_clock() -> u64 {
    0
}

impl InputCore {
    pub const fn new() -> Self {
        Self::with_clock(zero_clock)
    }

    /// `clock` returns the event timestamp in microseconds
    pub const fn with_clock(clock: fn() -> u64) -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(0),
            fail_next_register: AtomicBool::new(false),
            clock,
        }
    }

    /// Make the next `register_device` fail with `NoMemory`
    pub fn fail_next_registration(&self) {
        self.fail_next_register.store(true, Ordering::SeqCst);
    }

    /// Get input device by handle
    pub fn device(&self, handle: DeviceHandle) -> Option<Arc<InputDevice>> {
        self.devices.lock().get(&handle.0).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<InputDevice>> {
        self.devices.lock().values().find(|d| d.name() == name).cloned()
    }

    /// Get number of input devices
    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }
}

impl Default for InputCore {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSubsystem for InputCore {
    fn register_device(&self, dev: &InputDev) -> KResult<DeviceHandle> {
        if self.fail_next_register.swap(false, Ordering::SeqCst) {
            return Err(KError::NoMemory);
        }
        if dev.name.is_empty() || dev.evbit.is_empty() {
            return Err(KError::Invalid);
        }

        let handle = DeviceHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.devices
            .lock()
            .insert(handle.0, Arc::new(InputDevice::new(handle, dev.clone())));

        crate::kprintln!("input: {} as /dev/input/event{}", dev.name, handle.0);
        Ok(handle)
    }

    fn unregister_device(&self, handle: DeviceHandle) {
        self.devices.lock().remove(&handle.0);
    }

    fn report(&self, handle: DeviceHandle, event_type: EventType, code: u16, value: i32) {
        // Clone out so the registry lock is not held while queueing
        let device = self.device(handle);
        if let Some(device) = device {
            device.accept(event_type, code, value, (self.clock)());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_dev() -> InputDev {
        let mut dev = InputDev::default();
        dev.set_name("test touch");
        dev.set_evbit(EventBits::KEY | EventBits::ABS);
        dev.set_keybit(KeyCode::BtnTouch);
        dev.set_abs_params(AbsCode::X, 0, 255, 0, 0);
        dev.set_abs_params(AbsCode::Y, 0, 255, 0, 0);
        dev
    }

    #[test]
    fn test_event_layout() {
        assert_eq!(InputEvent::size(), 24);
        let ev = InputEvent::new(EventType::Key as u16, KeyCode::BtnTouch as u16, 1, 2_000_003);
        assert_eq!(ev.sec, 2);
        assert_eq!(ev.usec, 3);
        let bytes = ev.to_bytes();
        assert_eq!(&bytes[16..18], &1u16.to_ne_bytes());
        assert_eq!(&bytes[18..20], &0x14au16.to_ne_bytes());
    }

    #[test]
    fn test_register_report_read() {
        let core = InputCore::new();
        let h = core.register_device(&touch_dev()).unwrap();
        core.report_key(h, KeyCode::BtnTouch, true);
        core.report_abs(h, AbsCode::X, 10);
        core.report_abs(h, AbsCode::Y, 20);
        core.sync(h);

        let dev = core.device(h).unwrap();
        let c = dev.counters();
        assert_eq!((c.key_down, c.abs_x, c.abs_y, c.syncs), (1, 1, 1, 1));

        let mut buf = [0u8; 24 * 8];
        assert_eq!(dev.read(&mut buf), 24 * 4);
        assert!(!dev.has_events());
    }

    #[test]
    fn test_undeclared_events_are_filtered() {
        let core = InputCore::new();
        let h = core.register_device(&touch_dev()).unwrap();
        core.report_key(h, KeyCode::BtnLeft, true);
        core.report(h, EventType::Rel, 0, 1);
        core.report_abs(h, AbsCode::Pressure, 9);
        let dev = core.device(h).unwrap();
        assert_eq!(dev.counters().filtered, 3);
        assert!(!dev.has_events());
    }

    #[test]
    fn test_registration_failures() {
        let core = InputCore::new();
        assert_eq!(core.register_device(&InputDev::default()), Err(KError::Invalid));
        core.fail_next_registration();
        assert_eq!(core.register_device(&touch_dev()), Err(KError::NoMemory));
        let h = core.register_device(&touch_dev()).unwrap();
        assert_eq!(core.device_count(), 1);
        core.unregister_device(h);
        assert!(core.device(h).is_none());
        // Reports to a gone device are dropped
        core.sync(h);
    }
}
