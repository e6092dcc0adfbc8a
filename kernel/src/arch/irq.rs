//! IRQ lines
//!
//! `InterruptController` is what a driver needs from the platform:
//! `request_irq` / `free_irq`. `IrqTable` is the in-kernel implementation;
//! `raise` delivers an interrupt to the installed handler the way the
//! interrupt dispatcher does after an EOI-able vector fires.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use spin::Mutex;

use crate::util::{KError, KResult};

/// Handler return value (irqreturn_t)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not our interrupt
    None,
    /// Interrupt serviced
    Handled,
}

pub type IrqHandler = Arc<dyn Fn(u32) -> IrqReturn + Send + Sync>;

pub trait InterruptController: Send + Sync {
    /// Install `handler` on `irq`. Lines are not shared.
    fn request_irq(&self, irq: u32, name: &'static str, handler: IrqHandler) -> KResult<()>;

    /// Remove the handler from `irq`
    fn free_irq(&self, irq: u32);
}

struct IrqAction {
    name: &'static str,
    handler: IrqHandler,
    count: u64,
}

/// IRQ line table
pub struct IrqTable {
    lines: Mutex<BTreeMap<u32, IrqAction>>,
    reserved: Mutex<BTreeSet<u32>>,
}

impl IrqTable {
    pub const fn new() -> Self {
        Self {
            lines: Mutex::new(BTreeMap::new()),
            reserved: Mutex::new(BTreeSet::new()),
        }
    }

    /// Mark a line as owned by the platform; `request_irq` on it fails.
    pub fn reserve(&self, irq: u32) {
        self.reserved.lock().insert(irq);
    }

    /// Deliver an interrupt on `irq`.
    ///
    /// The handler runs outside the table lock so it may take its own locks.
    pub fn raise(&self, irq: u32) -> IrqReturn {
        let handler = {
            let mut lines = self.lines.lock();
            match lines.get_mut(&irq) {
                Some(action) => {
                    action.count += 1;
                    Arc::clone(&action.handler)
                }
                None => return IrqReturn::None,
            }
        };
        handler(irq)
    }

    pub fn is_registered(&self, irq: u32) -> bool {
        self.lines.lock().contains_key(&irq)
    }

    /// Name the line was requested with
    pub fn owner(&self, irq: u32) -> Option<&'static str> {
        self.lines.lock().get(&irq).map(|a| a.name)
    }

    /// Interrupts delivered on `irq` since it was requested
    pub fn count(&self, irq: u32) -> u64 {
        self.lines.lock().get(&irq).map_or(0, |a| a.count)
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for IrqTable {
    fn request_irq(&self, irq: u32, name: &'static str, handler: IrqHandler) -> KResult<()> {
        if self.reserved.lock().contains(&irq) {
            return Err(KError::Busy);
        }

        let mut lines = self.lines.lock();
        if lines.contains_key(&irq) {
            return Err(KError::Busy);
        }
        lines.insert(irq, IrqAction { name, handler, count: 0 });
        Ok(())
    }

    fn free_irq(&self, irq: u32) {
        if self.lines.lock().remove(&irq).is_none() {
            crate::kprintln!("irq: trying to free already-free IRQ {}", irq);
        }
    }
}
