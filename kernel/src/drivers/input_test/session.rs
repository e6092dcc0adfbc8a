//! Buffer lifecycle and command dispatch
//!
//! One [`Session`] per driver instance, shared by every open file. Writes
//! replace the retained [`InputBuffer`], commands lazily build the
//! [`DispatchTable`] and run one of its operations against whatever buffer
//! is current. `write`, `ioctl` and `release` run under the session's
//! [`SharedLock`].
//!
//! Fields are kept in a short inner mutex taken once per step. In faithful
//! mode `open` swaps the shared lock, so two callers may run the steps of
//! `write` interleaved: they see each other's buffers and free them twice,
//! which the slab records instead of corrupting memory.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;

use crate::drivers::input::InputSubsystem;
use crate::drivers::misc::FileOperations;
use crate::mm::{copy_from_user, GfpFlags, KAddr, Slab, UserSlice};
use crate::sync::SharedLock;
use crate::util::{oops, KError, KResult};

use super::buffer::{InputBuffer, SizePlan};
use super::config::{DriverConfig, Mode};
use super::device::DeviceSlot;
use super::dispatch::{
    ByteSource, Command, DispatchTable, Operand, PressPolicy, TouchOp, TouchTarget, PRESS_SLOT_OFFSET,
};

#[derive(Default)]
struct SessionState {
    buffer: Option<InputBuffer>,
    table: Option<DispatchTable>,
}

/// Live view of a slab object for the press loop
struct ObjectView<'a> {
    slab: &'a Slab,
    addr: KAddr,
}

impl ByteSource for ObjectView<'_> {
    fn byte_at(&self, offset: usize) -> u8 {
        match self.slab.read_byte(self.addr, offset) {
            Some(b) => b,
            None => page_fault(self.addr.as_u64() + offset as u64),
        }
    }
}

fn null_deref(offset: u64) -> ! {
    oops(format_args!("kernel NULL pointer dereference, address: {:016x}", offset))
}

fn page_fault(addr: u64) -> ! {
    oops(format_args!("unable to handle page fault for address: {:016x}", addr))
}

pub struct Session {
    config: DriverConfig,
    slab: Arc<Slab>,
    input: Arc<dyn InputSubsystem>,
    device: Arc<DeviceSlot>,
    lock: SharedLock,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        config: DriverConfig,
        slab: Arc<Slab>,
        input: Arc<dyn InputSubsystem>,
        device: Arc<DeviceSlot>,
    ) -> Self {
        Self {
            config,
            slab,
            input,
            device,
            lock: SharedLock::new(),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    fn faithful(&self) -> bool {
        self.config.is_faithful()
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        (self.config.log_hook)(args);
    }

    pub fn open(&self) -> KResult<()> {
        self.log(format_args!("input_test_driver open"));
        if self.faithful() {
            self.lock.reinit();
        }
        Ok(())
    }

    /// Free the buffer and the dispatch table. A second call finds nothing.
    pub fn release(&self) -> KResult<()> {
        self.log(format_args!("input_test_driver release"));

        let _guard = self.lock.lock();
        let (buffer, table) = {
            let mut state = self.state.lock();
            (state.buffer.take(), state.table.take())
        };

        if let Some(buffer) = buffer {
            self.slab.kfree(buffer.addr());
        }
        if let Some(table) = table {
            table.free(&self.slab);
        }
        Ok(())
    }

    /// Replace the retained buffer with `count` bytes from `data`.
    pub fn write(&self, data: UserSlice<'_>, count: usize) -> KResult<usize> {
        let _guard = self.lock.lock();

        // Faithful keeps the freed reference until the new allocation lands.
        let previous = if self.faithful() {
            self.state.lock().buffer
        } else {
            self.state.lock().buffer.take()
        };
        if let Some(previous) = previous {
            self.slab.kfree(previous.addr());
        }

        let plan = SizePlan::for_count(count, self.config.mode)?;

        let fresh = match self.slab.kmalloc(plan.alloc_size, GfpFlags::ATOMIC) {
            Some(addr) => {
                let buffer = InputBuffer::new(addr, plan.alloc_size);
                self.state.lock().buffer = Some(buffer);
                Some(buffer)
            }
            None if self.faithful() => {
                crate::kprintln!(
                    "input_test_driver: kmalloc({}) failed, reusing stale buffer",
                    plan.alloc_size
                );
                None
            }
            None => return Err(KError::NoMemory),
        };

        // Faithful copies through the shared reference, which a racing writer
        // may have replaced by now.
        let target = if self.faithful() {
            self.state.lock().buffer
        } else {
            fresh
        };

        let Some(target) = target else {
            null_deref(0);
        };
        if self.slab.ksize(target.addr()).is_none() {
            page_fault(target.addr().as_u64());
        }

        let missing = copy_from_user(&self.slab, target.addr(), data, plan.copy_len);
        let copied = if missing == 0 || self.faithful() {
            plan.copy_len - missing
        } else {
            0
        };

        if let Some(buffer) = self
            .state
            .lock()
            .buffer
            .as_mut()
            .filter(|b| b.addr() == target.addr())
        {
            buffer.set_len(copied);
        }

        if missing > 0 {
            return Err(KError::Fault);
        }
        Ok(0)
    }

    /// Press (`0x1337`) or release (`0x7331`); anything else is ignored.
    pub fn ioctl(&self, cmd: u32, _arg: u64) -> KResult<i64> {
        let command = Command::from_code(cmd);
        match command {
            Command::Press => self.log(format_args!("report_touch_press call")),
            Command::Release => self.log(format_args!("report_touch_release call")),
            Command::Unknown(_) => return Ok(0),
        }

        let _guard = self.lock.lock();

        let table = self.dispatch_table()?;
        let Some(op) = table.op(command) else {
            return Ok(0);
        };
        let device = self.device.get().ok_or(KError::NoDevice)?;
        let target = TouchTarget {
            input: &*self.input,
            device,
            log_hook: table.log_hook(),
        };

        let result = match op {
            TouchOp::ReportPress => self.press(op, &target),
            TouchOp::ReportRelease => op.run(&target, None),
        };

        match result {
            Ok(()) => Ok(0),
            // The press status never reached the caller.
            Err(_) if self.faithful() => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn dispatch_table(&self) -> KResult<DispatchTable> {
        if let Some(table) = self.state.lock().table {
            return Ok(table);
        }

        match DispatchTable::allocate(&self.slab, self.config.log_hook) {
            Some(table) => {
                self.state.lock().table = Some(table);
                Ok(table)
            }
            None if self.faithful() => null_deref(PRESS_SLOT_OFFSET),
            None => Err(KError::NoMemory),
        }
    }

    fn press(&self, op: TouchOp, target: &TouchTarget<'_>) -> KResult<()> {
        let buffer = self.state.lock().buffer;

        let (addr, len) = match (buffer, self.config.mode) {
            (None, Mode::Faithful) => null_deref(0),
            (None, Mode::Hardened) => return Err(KError::NoData),
            (Some(buffer), Mode::Faithful) => {
                let len = match self.slab.strlen(buffer.addr()) {
                    Some(len) => len,
                    None => page_fault(buffer.addr().as_u64()),
                };
                (buffer.addr(), len)
            }
            (Some(buffer), Mode::Hardened) => (buffer.addr(), buffer.len()),
        };

        let view = ObjectView { slab: &self.slab, addr };
        let operand = Operand {
            source: &view,
            len,
            policy: PressPolicy::for_mode(self.config.mode),
        };
        op.run(target, Some(operand))
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn buffer(&self) -> Option<InputBuffer> {
        self.state.lock().buffer
    }

    /// The copied bytes of the current buffer
    pub fn buffer_contents(&self) -> Option<Vec<u8>> {
        let buffer = self.buffer()?;
        self.slab.read(buffer.addr(), 0, buffer.len())
    }

    pub fn has_dispatch_table(&self) -> bool {
        self.state.lock().table.is_some()
    }

    pub fn shared_lock(&self) -> &SharedLock {
        &self.lock
    }

    pub fn slab(&self) -> &Arc<Slab> {
        &self.slab
    }
}

impl FileOperations for Session {
    fn open(&self) -> KResult<()> {
        Session::open(self)
    }

    fn release(&self) -> KResult<()> {
        Session::release(self)
    }

    fn write(&self, data: UserSlice<'_>, count: usize) -> KResult<usize> {
        Session::write(self, data, count)
    }

    fn unlocked_ioctl(&self, cmd: u32, arg: u64) -> KResult<i64> {
        self.ioctl(cmd, arg)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("mode", &self.config.mode)
            .field("buffer", &state.buffer)
            .field("table", &state.table)
            .field("lock_generation", &self.lock.generation())
            .finish()
    }
}
