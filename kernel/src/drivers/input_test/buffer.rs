//! Input buffer and the write size policy
//!
//! A write never appends: it frees the previous buffer and allocates a new
//! one. How much is reserved and how much is copied are decided separately:
//!
//! | count                  | allocated | copied |
//! |------------------------|-----------|--------|
//! | `< 256`                | 256       | count  |
//! | `256 ..= 0x40000`      | count     | count  |
//! | `> 0x40000`            | count     | 416    |
//!
//! Hardened mode refuses the last row instead of truncating the copy.

use crate::mm::KAddr;
use crate::util::{KError, KResult};

use super::config::Mode;

/// Writes below this are upgraded to a full small object
pub const SMALL_WRITE_ALLOC: usize = 256;
/// Largest write copied in full
pub const LARGE_WRITE_THRESHOLD: usize = 0x40000;
/// Bytes copied for writes above the threshold
pub const LARGE_WRITE_COPY: usize = 416;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBranch {
    /// count < 256
    Small,
    /// 256 <= count <= 0x40000
    Exact,
    /// count > 0x40000
    Oversized,
}

/// Allocation size and copy length for one write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePlan {
    pub branch: SizeBranch,
    pub alloc_size: usize,
    pub copy_len: usize,
}

impl SizePlan {
    pub fn for_count(count: usize, mode: Mode) -> KResult<Self> {
        let plan = if count < SMALL_WRITE_ALLOC {
            SizePlan { branch: SizeBranch::Small, alloc_size: SMALL_WRITE_ALLOC, copy_len: count }
        } else if count > LARGE_WRITE_THRESHOLD {
            if mode == Mode::Hardened {
                return Err(KError::TooBig);
            }
            SizePlan { branch: SizeBranch::Oversized, alloc_size: count, copy_len: LARGE_WRITE_COPY }
        } else {
            SizePlan { branch: SizeBranch::Exact, alloc_size: count, copy_len: count }
        };
        Ok(plan)
    }
}

/// The session's retained buffer: a slab object plus its two sizes.
///
/// `len <= capacity` holds for every buffer the driver allocates itself. It
/// breaks only when faithful mode copies into a stale, smaller object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBuffer {
    addr: KAddr,
    capacity: usize,
    len: usize,
}

impl InputBuffer {
    pub(super) fn new(addr: KAddr, capacity: usize) -> Self {
        Self { addr, capacity, len: 0 }
    }

    pub fn addr(&self) -> KAddr {
        self.addr
    }

    /// Bytes reserved
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes copied from the caller
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(super) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    pub fn is_consistent(&self) -> bool {
        self.len <= self.capacity
    }
}
