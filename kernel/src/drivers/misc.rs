//! Misc character devices (major 10)
//!
//! A driver registers a name and a [`FileOperations`] table; the registry
//! assigns a dynamic minor. `open` on a registered name returns a [`File`]
//! that forwards write / ioctl to the driver and calls `release` when closed
//! or dropped.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::mm::UserSlice;
use crate::util::{KError, KResult};

/// Number of minors handed out dynamically (63 down to 0)
pub const DYNAMIC_MINORS: u8 = 64;

/// Entry points of a character device (file_operations)
pub trait FileOperations: Send + Sync {
    fn open(&self) -> KResult<()>;

    fn release(&self) -> KResult<()>;

    /// `count` is what the caller claims to pass; `data` is what is readable.
    fn write(&self, data: UserSlice<'_>, count: usize) -> KResult<usize>;

    fn unlocked_ioctl(&self, cmd: u32, arg: u64) -> KResult<i64>;
}

/// What a driver consumes from the misc layer
pub trait MiscRegistrar: Send + Sync {
    fn misc_register(&self, name: &'static str, fops: Arc<dyn FileOperations>) -> KResult<u8>;

    fn misc_deregister(&self, minor: u8);
}

struct MiscDevice {
    name: &'static str,
    fops: Arc<dyn FileOperations>,
}

/// Misc device registry
pub struct MiscRegistry {
    devices: Mutex<BTreeMap<u8, MiscDevice>>,
    fail_next_register: AtomicBool,
}

impl MiscRegistry {
    pub const fn new() -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            fail_next_register: AtomicBool::new(false),
        }
    }

    /// Make the next `misc_register` fail with `Busy`
    pub fn fail_next_registration(&self) {
        self.fail_next_register.store(true, Ordering::SeqCst);
    }

    pub fn minor_of(&self, name: &str) -> Option<u8> {
        self.devices
            .lock()
            .iter()
            .find(|(_, d)| d.name == name)
            .map(|(minor, _)| *minor)
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// open("/dev/<name>")
    pub fn open(&self, name: &str) -> KResult<File> {
        let (minor, fops) = {
            let devices = self.devices.lock();
            let (minor, dev) = devices
                .iter()
                .find(|(_, d)| d.name == name)
                .ok_or(KError::NotFound)?;
            (*minor, Arc::clone(&dev.fops))
        };

        fops.open()?;
        Ok(File { minor, fops, closed: false })
    }
}

impl Default for MiscRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MiscRegistrar for MiscRegistry {
    fn misc_register(&self, name: &'static str, fops: Arc<dyn FileOperations>) -> KResult<u8> {
        if self.fail_next_register.swap(false, Ordering::SeqCst) {
            return Err(KError::Busy);
        }

        let mut devices = self.devices.lock();
        if devices.values().any(|d| d.name == name) {
            return Err(KError::AlreadyExists);
        }

        let minor = (0..DYNAMIC_MINORS)
            .rev()
            .find(|m| !devices.contains_key(m))
            .ok_or(KError::Busy)?;
        devices.insert(minor, MiscDevice { name, fops });
        Ok(minor)
    }

    fn misc_deregister(&self, minor: u8) {
        self.devices.lock().remove(&minor);
    }
}

/// An open file on a misc device
pub struct File {
    minor: u8,
    fops: Arc<dyn FileOperations>,
    closed: bool,
}

impl File {
    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// write(fd, data, data.len())
    pub fn write(&self, data: &[u8]) -> KResult<usize> {
        self.fops.write(UserSlice::new(data), data.len())
    }

    /// write(fd, ptr, count) where only `data` is readable behind `ptr`
    pub fn write_count(&self, data: &[u8], count: usize) -> KResult<usize> {
        self.fops.write(UserSlice::new(data), count)
    }

    pub fn ioctl(&self, cmd: u32, arg: u64) -> KResult<i64> {
        self.fops.unlocked_ioctl(cmd, arg)
    }

    pub fn close(mut self) -> KResult<()> {
        self.closed = true;
        self.fops.release()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.fops.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        opens: AtomicUsize,
        releases: AtomicUsize,
        written: AtomicUsize,
    }

    impl FileOperations for Counting {
        fn open(&self) -> KResult<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) -> KResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn write(&self, data: UserSlice<'_>, count: usize) -> KResult<usize> {
            if data.readable() < count {
                return Err(KError::Fault);
            }
            self.written.fetch_add(count, Ordering::SeqCst);
            Ok(count)
        }

        fn unlocked_ioctl(&self, cmd: u32, _arg: u64) -> KResult<i64> {
            Ok(cmd as i64)
        }
    }

    #[test]
    fn test_dynamic_minors() {
        let misc = MiscRegistry::new();
        let ops = Arc::new(Counting::default());
        assert_eq!(misc.misc_register("a", ops.clone()), Ok(63));
        assert_eq!(misc.misc_register("b", ops.clone()), Ok(62));
        assert_eq!(misc.misc_register("a", ops.clone()), Err(KError::AlreadyExists));
        misc.misc_deregister(63);
        assert_eq!(misc.minor_of("a"), None);
        assert_eq!(misc.misc_register("c", ops), Ok(63));
    }

    #[test]
    fn test_file_roundtrip() {
        let misc = MiscRegistry::new();
        let ops = Arc::new(Counting::default());
        misc.misc_register("dev", ops.clone()).unwrap();

        assert!(matches!(misc.open("nope"), Err(KError::NotFound)));

        let file = misc.open("dev").unwrap();
        assert_eq!(file.write(b"abc"), Ok(3));
        assert_eq!(file.write_count(b"abc", 10), Err(KError::Fault));
        assert_eq!(file.ioctl(7, 0), Ok(7));
        file.close().unwrap();

        {
            let _dropped = misc.open("dev").unwrap();
        }

        assert_eq!(ops.opens.load(Ordering::SeqCst), 2);
        assert_eq!(ops.releases.load(Ordering::SeqCst), 2);
        assert_eq!(ops.written.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_injected_failure() {
        let misc = MiscRegistry::new();
        misc.fail_next_registration();
        assert_eq!(misc.misc_register("dev", Arc::new(Counting::default())), Err(KError::Busy));
        assert_eq!(misc.device_count(), 0);
    }
}
