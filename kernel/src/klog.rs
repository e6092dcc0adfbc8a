//! Kernel log ring (dmesg)
//!
//! Everything printed through `kprint!` / `kprintln!` lands here, split into
//! lines. The ring keeps the newest `KLOG_CAPACITY` lines. A host may install
//! a console sink that receives the raw text as well.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};
use spin::{Mutex, RwLock};

/// Maximum lines kept in the ring
pub const KLOG_CAPACITY: usize = 1024;

struct KlogRing {
    lines: VecDeque<String>,
    partial: String,
    dropped: u64,
}

impl KlogRing {
    const fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            partial: String::new(),
            dropped: 0,
        }
    }

    fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                let line = core::mem::take(&mut self.partial);
                if self.lines.len() >= KLOG_CAPACITY {
                    self.lines.pop_front();
                    self.dropped += 1;
                }
                self.lines.push_back(line);
            } else {
                self.partial.push(ch);
            }
        }
    }
}

static KLOG: Mutex<KlogRing> = Mutex::new(KlogRing::new());
static CONSOLE: RwLock<Option<fn(&str)>> = RwLock::new(None);

/// Install a console sink (serial port, host stdout, ...)
pub fn set_console(sink: fn(&str)) {
    *CONSOLE.write() = Some(sink);
}

pub fn print(args: fmt::Arguments) {
    let mut text = String::new();
    let _ = text.write_fmt(args);

    if let Some(sink) = *CONSOLE.read() {
        sink(&text);
    }

    KLOG.lock().push_text(&text);
}

/// Snapshot of the complete lines currently in the ring
pub fn dmesg() -> Vec<String> {
    KLOG.lock().lines.iter().cloned().collect()
}

/// Check if any line in the ring contains `needle`
pub fn contains(needle: &str) -> bool {
    KLOG.lock().lines.iter().any(|l| l.contains(needle))
}

/// Lines evicted since boot
pub fn dropped() -> u64 {
    KLOG.lock().dropped
}
