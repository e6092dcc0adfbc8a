//! Touch controller registers
//!
//! The controller exposes a status and a control register through MMIO and
//! the two coordinate latches through port I/O:
//!
//! | register | space | address  |
//! |----------|-------|----------|
//! | STATUS   | MMIO  | `0x1337` |
//! | CONTROL  | MMIO  | `0x7331` |
//! | DATA_Y   | I/O   | `0x7331` |
//! | DATA_X   | I/O   | `0x1337` |
//!
//! Writing CONTROL back with the value just read from it ("strobe") latches
//! the next coordinate.

use bitflags::bitflags;
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Mmio,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAddr {
    pub space: Space,
    pub addr: u16,
}

impl RegisterAddr {
    pub const fn mmio(addr: u16) -> Self {
        Self { space: Space::Mmio, addr }
    }

    pub const fn io(addr: u16) -> Self {
        Self { space: Space::Io, addr }
    }
}

pub const STATUS: RegisterAddr = RegisterAddr::mmio(0x1337);
pub const CONTROL: RegisterAddr = RegisterAddr::mmio(0x7331);
pub const DATA_Y: RegisterAddr = RegisterAddr::io(0x7331);
pub const DATA_X: RegisterAddr = RegisterAddr::io(0x1337);

bitflags! {
    /// STATUS register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u8 {
        /// Any of these set: a sample is latched
        const DATA_READY = 0x07;
        /// Pen is down
        const TOUCH = 0x08;
    }
}

/// Raw register access (readb / writeb / inb)
pub trait RegisterBus: Send + Sync {
    fn read_register(&self, reg: RegisterAddr) -> u8;

    fn write_register(&self, reg: RegisterAddr, value: u8);
}

// =============================================================================
// Simulated panel
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct PanelState {
    pen_down: bool,
    sample_ready: bool,
    x: u8,
    y: u8,
    control: u8,
    strobes: u32,
    reads: u32,
}

/// Register file of a resistive panel driven from software
pub struct SimulatedPanel {
    state: Mutex<PanelState>,
}

impl SimulatedPanel {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(PanelState {
                pen_down: false,
                sample_ready: false,
                x: 0,
                y: 0,
                control: 0,
                strobes: 0,
                reads: 0,
            }),
        }
    }

    /// Put the pen down at (x, y) and latch a sample
    pub fn touch(&self, x: u8, y: u8) {
        let mut s = self.state.lock();
        s.pen_down = true;
        s.sample_ready = true;
        s.x = x;
        s.y = y;
    }

    /// Lift the pen; no sample is latched
    pub fn lift(&self) {
        let mut s = self.state.lock();
        s.pen_down = false;
        s.sample_ready = false;
    }

    /// Latch a sample while the pen is already up (a bounce)
    pub fn bounce(&self) {
        let mut s = self.state.lock();
        s.pen_down = false;
        s.sample_ready = true;
    }

    /// CONTROL read-back writes since creation
    pub fn strobes(&self) -> u32 {
        self.state.lock().strobes
    }

    /// Register reads since creation
    pub fn reads(&self) -> u32 {
        self.state.lock().reads
    }
}

impl Default for SimulatedPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for SimulatedPanel {
    fn read_register(&self, reg: RegisterAddr) -> u8 {
        let mut s = self.state.lock();
        s.reads += 1;
        match reg {
            STATUS => {
                let mut status = StatusBits::empty();
                if s.sample_ready {
                    status |= StatusBits::from_bits_retain(0x01);
                }
                if s.pen_down {
                    status |= StatusBits::TOUCH;
                }
                status.bits()
            }
            CONTROL => s.control,
            DATA_X => s.x,
            DATA_Y => s.y,
            // Open bus
            _ => 0xff,
        }
    }

    fn write_register(&self, reg: RegisterAddr, value: u8) {
        let mut s = self.state.lock();
        if reg == CONTROL {
            s.control = value;
            s.strobes += 1;
        }
    }
}

// =============================================================================
// Hardware access
// =============================================================================

/// MMIO window + x86 port I/O
#[cfg(target_arch = "x86_64")]
pub struct PortBus {
    mmio_base: usize,
}

#[cfg(target_arch = "x86_64")]
impl PortBus {
    /// # Safety
    /// `mmio_base` deve mapear a janela MMIO do controlador e as portas de
    /// I/O `DATA_X` / `DATA_Y` devem pertencer a ele.
    pub const unsafe fn new(mmio_base: usize) -> Self {
        Self { mmio_base }
    }
}

#[cfg(target_arch = "x86_64")]
impl RegisterBus for PortBus {
    fn read_register(&self, reg: RegisterAddr) -> u8 {
        match reg.space {
            Space::Io => {
                let mut port: x86_64::instructions::port::Port<u8> =
                    x86_64::instructions::port::Port::new(reg.addr);
                unsafe { port.read() }
            }
            Space::Mmio => unsafe {
                core::ptr::read_volatile((self.mmio_base + reg.addr as usize) as *const u8)
            },
        }
    }

    fn write_register(&self, reg: RegisterAddr, value: u8) {
        match reg.space {
            Space::Io => {
                let mut port: x86_64::instructions::port::Port<u8> =
                    x86_64::instructions::port::Port::new(reg.addr);
                unsafe { port.write(value) }
            }
            Space::Mmio => unsafe {
                core::ptr::write_volatile((self.mmio_base + reg.addr as usize) as *mut u8, value)
            },
        }
    }
}
