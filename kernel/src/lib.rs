//! input_test_kernel
//!
//! Driver de teste de touchscreen virtual e o pedaço mínimo de kernel que ele
//! precisa para rodar: log (`kprintln!`), erros (`KError`), alocador slab,
//! tabela de IRQs, misc devices e o subsistema de input.
//!
//! The driver itself lives in [`drivers::input_test`]. It exposes a misc
//! character device (`open` / `write` / `ioctl` / `release`) whose writes fill
//! a single retained buffer, and whose ioctls replay that buffer as touch
//! coordinates through a lazily allocated dispatch table. An interrupt-driven
//! poll routine feeds the same virtual touchscreen from hardware registers.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod util;

pub mod arch;
pub mod drivers;
pub mod klog;
pub mod mm;
pub mod sync;

pub use util::{KError, KResult};
