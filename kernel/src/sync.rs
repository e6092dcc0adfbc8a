//! Synchronization primitives for the driver session
//!
//! - `RawSpinlock`: test-and-set spinlock without payload, released by an
//!   owned guard so the lock instance can be swapped while someone holds it
//! - `SharedLock`: a session's mutual-exclusion domain. `reinit` installs a
//!   fresh `RawSpinlock` the way `mutex_init` on a live mutex does: holders of
//!   the previous instance keep it, new callers get the new one.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::RwLock;

// ============================================================================
// Raw Spinlock - Simple test-and-set
// ============================================================================

/// A basic test-and-set spinlock
///
/// Unfair under contention, which is fine for the short critical sections of
/// a character device.
pub struct RawSpinlock {
    locked: AtomicBool,
    generation: u64,
}

/// Holds a `RawSpinlock` until dropped.
pub struct RawSpinlockGuard {
    lock: Arc<RawSpinlock>,
}

impl RawSpinlock {
    pub const fn new(generation: u64) -> Self {
        Self {
            locked: AtomicBool::new(false),
            generation,
        }
    }

    /// Acquires the spinlock, spinning until available
    #[inline]
    pub fn lock(this: &Arc<Self>) -> RawSpinlockGuard {
        while this
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin-wait hint
            while this.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }

        RawSpinlockGuard { lock: Arc::clone(this) }
    }

    /// Tries to acquire the spinlock without blocking
    #[inline]
    pub fn try_lock(this: &Arc<Self>) -> Option<RawSpinlockGuard> {
        if this
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(RawSpinlockGuard { lock: Arc::clone(this) })
        } else {
            None
        }
    }

    /// Returns true if the lock is currently held
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl RawSpinlockGuard {
    /// Generation of the lock instance this guard holds
    pub fn generation(&self) -> u64 {
        self.lock.generation
    }
}

impl Drop for RawSpinlockGuard {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

// ============================================================================
// Shared Lock - swappable mutual-exclusion domain
// ============================================================================

pub struct SharedLock {
    current: RwLock<Arc<RawSpinlock>>,
    next_generation: AtomicU64,
}

impl SharedLock {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RawSpinlock::new(0))),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Replaces the lock with a fresh, unlocked instance.
    pub fn reinit(&self) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        *self.current.write() = Arc::new(RawSpinlock::new(generation));
        generation
    }

    pub fn lock(&self) -> RawSpinlockGuard {
        let instance = self.instance();
        RawSpinlock::lock(&instance)
    }

    pub fn try_lock(&self) -> Option<RawSpinlockGuard> {
        let instance = self.instance();
        RawSpinlock::try_lock(&instance)
    }

    /// The lock instance new callers will acquire
    pub fn instance(&self) -> Arc<RawSpinlock> {
        Arc::clone(&self.current.read())
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}
