//! Memória do driver: modelo de slab (kmalloc/kfree) e cópia de user space.

pub mod slab;
pub mod uaccess;

pub use slab::{GfpFlags, KAddr, Slab, SlabStats};
pub use uaccess::{copy_from_user, UserSlice};
