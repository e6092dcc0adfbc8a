//! Slab allocator model (kmalloc / kzalloc / kfree)
//!
//! Objects are tracked by their kernel virtual address. A freed object is
//! parked in a FIFO quarantine where it keeps its bytes: a stale pointer
//! still reads and writes the old contents, so use-after-free is observable
//! instead of undefined. Objects evicted from the quarantine are unmapped.
//!
//! ## Accounting
//! - single allocations above `KMALLOC_MAX_SIZE` fail
//! - live bytes are bounded by a budget
//! - failures can be injected for the next N allocations
//!
//! ## Detection
//! - double free and free of an unknown address are counted, never fatal
//! - writes past the end of an object are clipped and counted
//! - reads past the end hit a zero redzone

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec;
use alloc::vec::Vec;
use alloc::boxed::Box;
use bitflags::bitflags;
use spin::Mutex;

use crate::kprintln;

/// Largest single kmalloc (order-10 pages)
pub const KMALLOC_MAX_SIZE: usize = 4 << 20;

/// Default live-byte budget
pub const DEFAULT_BUDGET: usize = 64 << 20;

/// Default number of freed objects kept mapped
pub const DEFAULT_QUARANTINE: usize = 32;

/// Fill byte for uninitialized objects when init-on-alloc is off
pub const POISON_INUSE: u8 = 0x5a;

/// Value read past the end of an object
pub const REDZONE_BYTE: u8 = 0x00;

const SLAB_BASE: u64 = 0xFFFF_8880_0010_0000;
const SLAB_ALIGN: u64 = 64;

bitflags! {
    /// Allocation flags (subset of gfp_t)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GfpFlags: u32 {
        /// May sleep
        const KERNEL = 1 << 0;
        /// Atomic context, must not sleep
        const ATOMIC = 1 << 1;
        /// Zero the object
        const ZERO = 1 << 2;
    }
}

/// Kernel virtual address of a slab object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KAddr(pub u64);

impl KAddr {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    Live,
    Freed,
}

struct SlabObject {
    data: Box<[u8]>,
    state: ObjectState,
}

/// Slab statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlabStats {
    pub allocs: u64,
    pub frees: u64,
    pub failed_allocs: u64,
    pub double_frees: u64,
    pub invalid_frees: u64,
    pub oob_writes: u64,
    pub stale_accesses: u64,
    pub live_objects: usize,
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
}

struct SlabInner {
    objects: BTreeMap<KAddr, SlabObject>,
    quarantine: VecDeque<KAddr>,
    next_addr: u64,
    budget: usize,
    quarantine_depth: usize,
    init_on_alloc: bool,
    fail_next: u32,
    stats: SlabStats,
}

impl SlabInner {
    fn object(&mut self, addr: KAddr) -> Option<&mut SlabObject> {
        let obj = self.objects.get_mut(&addr)?;
        if obj.state == ObjectState::Freed {
            self.stats.stale_accesses += 1;
        }
        Some(obj)
    }
}

pub struct Slab {
    inner: Mutex<SlabInner>,
}

impl Slab {
    pub fn new(budget: usize, quarantine_depth: usize) -> Self {
        Self {
            inner: Mutex::new(SlabInner {
                objects: BTreeMap::new(),
                quarantine: VecDeque::new(),
                next_addr: SLAB_BASE,
                budget,
                quarantine_depth,
                init_on_alloc: true,
                fail_next: 0,
                stats: SlabStats::default(),
            }),
        }
    }

    /// Zero objects on allocation (init_on_alloc=1). On by default.
    pub fn set_init_on_alloc(&self, enabled: bool) {
        self.inner.lock().init_on_alloc = enabled;
    }

    /// Make the next `count` allocations fail
    pub fn inject_failures(&self, count: u32) {
        self.inner.lock().fail_next = count;
    }

    pub fn kmalloc(&self, size: usize, flags: GfpFlags) -> Option<KAddr> {
        let mut inner = self.inner.lock();

        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            inner.stats.failed_allocs += 1;
            return None;
        }

        if size > KMALLOC_MAX_SIZE {
            inner.stats.failed_allocs += 1;
            drop(inner);
            kprintln!("kmalloc: {} bytes exceeds KMALLOC_MAX_SIZE", size);
            return None;
        }

        if inner.stats.bytes_in_use + size > inner.budget {
            inner.stats.failed_allocs += 1;
            return None;
        }

        let fill = if flags.contains(GfpFlags::ZERO) || inner.init_on_alloc {
            0
        } else {
            POISON_INUSE
        };

        let addr = KAddr(inner.next_addr);
        let span = (size as u64).max(1).div_ceil(SLAB_ALIGN) * SLAB_ALIGN;
        inner.next_addr += span + SLAB_ALIGN;

        inner.objects.insert(
            addr,
            SlabObject {
                data: vec![fill; size].into_boxed_slice(),
                state: ObjectState::Live,
            },
        );

        let stats = &mut inner.stats;
        stats.allocs += 1;
        stats.live_objects += 1;
        stats.bytes_in_use += size;
        stats.peak_bytes = stats.peak_bytes.max(stats.bytes_in_use);

        Some(addr)
    }

    pub fn kzalloc(&self, size: usize, flags: GfpFlags) -> Option<KAddr> {
        self.kmalloc(size, flags | GfpFlags::ZERO)
    }

    pub fn kfree(&self, addr: KAddr) {
        let mut inner = self.inner.lock();

        let size = match inner.objects.get_mut(&addr) {
            Some(obj) if obj.state == ObjectState::Live => {
                obj.state = ObjectState::Freed;
                obj.data.len()
            }
            Some(_) => {
                inner.stats.double_frees += 1;
                drop(inner);
                kprintln!("slab: double free of object {:#x}", addr.0);
                return;
            }
            None => {
                inner.stats.invalid_frees += 1;
                drop(inner);
                kprintln!("slab: kfree of unknown address {:#x}", addr.0);
                return;
            }
        };

        inner.stats.frees += 1;
        inner.stats.live_objects -= 1;
        inner.stats.bytes_in_use -= size;

        inner.quarantine.push_back(addr);
        while inner.quarantine.len() > inner.quarantine_depth {
            if let Some(evicted) = inner.quarantine.pop_front() {
                inner.objects.remove(&evicted);
            }
        }
    }

    /// Size of a mapped object (live or quarantined)
    pub fn ksize(&self, addr: KAddr) -> Option<usize> {
        self.inner.lock().objects.get(&addr).map(|o| o.data.len())
    }

    pub fn is_live(&self, addr: KAddr) -> bool {
        matches!(
            self.inner.lock().objects.get(&addr),
            Some(SlabObject { state: ObjectState::Live, .. })
        )
    }

    /// Read one byte. `None` if the address is not mapped.
    pub fn read_byte(&self, addr: KAddr, offset: usize) -> Option<u8> {
        let mut inner = self.inner.lock();
        let obj = inner.object(addr)?;
        Some(obj.data.get(offset).copied().unwrap_or(REDZONE_BYTE))
    }

    /// Read `len` bytes starting at `offset`, redzone past the end.
    pub fn read(&self, addr: KAddr, offset: usize, len: usize) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let obj = inner.object(addr)?;
        let mut out = vec![REDZONE_BYTE; len];
        if offset < obj.data.len() {
            let end = obj.data.len().min(offset + len);
            out[..end - offset].copy_from_slice(&obj.data[offset..end]);
        }
        Some(out)
    }

    /// strlen over the object. No terminator means the scan stops at the
    /// redzone, i.e. the object size.
    pub fn strlen(&self, addr: KAddr) -> Option<usize> {
        let mut inner = self.inner.lock();
        let obj = inner.object(addr)?;
        Some(obj.data.iter().position(|&b| b == 0).unwrap_or(obj.data.len()))
    }

    /// Write `bytes` at `offset`. Returns the bytes that fit inside the
    /// object; anything beyond is dropped and counted as corruption.
    pub fn write(&self, addr: KAddr, offset: usize, bytes: &[u8]) -> Option<usize> {
        let mut inner = self.inner.lock();
        let obj = inner.object(addr)?;
        let size = obj.data.len();
        let fits = size.saturating_sub(offset).min(bytes.len());
        if fits > 0 {
            obj.data[offset..offset + fits].copy_from_slice(&bytes[..fits]);
        }
        if fits < bytes.len() {
            inner.stats.oob_writes += 1;
            drop(inner);
            kprintln!(
                "slab: write of {} bytes past the end of object {:#x} (size {})",
                bytes.len() - fits,
                addr.0,
                size
            );
        }
        Some(fits)
    }

    /// memset over `len` bytes at `offset`, clipped like `write`.
    pub fn fill(&self, addr: KAddr, offset: usize, len: usize, byte: u8) -> Option<usize> {
        self.write(addr, offset, &vec![byte; len])
    }

    pub fn stats(&self) -> SlabStats {
        self.inner.lock().stats
    }
}

impl Default for Slab {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET, DEFAULT_QUARANTINE)
    }
}
