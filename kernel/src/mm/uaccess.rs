//! Cópia entre user space e objetos do kernel.

use super::slab::{KAddr, Slab};

/// A user-space buffer as seen by a syscall: the bytes that are actually
/// readable behind the user pointer. Reading beyond them faults.
#[derive(Debug, Clone, Copy)]
pub struct UserSlice<'a> {
    data: &'a [u8],
}

impl<'a> UserSlice<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Readable bytes behind the pointer
    pub fn readable(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

/// copy_from_user: copy `len` bytes from `src` into the object at `dst`.
///
/// Copies the readable prefix, zero-fills the rest of the destination range
/// and returns the number of bytes NOT copied (0 on success). Nothing is
/// copied into an unmapped destination.
pub fn copy_from_user(slab: &Slab, dst: KAddr, src: UserSlice<'_>, len: usize) -> usize {
    let readable = src.readable().min(len);
    if slab.write(dst, 0, &src.as_bytes()[..readable]).is_none() {
        return len;
    }

    let missing = len - readable;
    if missing > 0 && slab.fill(dst, readable, missing, 0).is_none() {
        return len;
    }
    missing
}
