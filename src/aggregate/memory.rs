//! Process memory readings for the aggregator's ceiling check
//!
//! Readings are advisory. A gauge that cannot measure returns `None` and the
//! ceiling check is skipped for that flush.
//!
//! Some platforms only expose the peak resident size (`ru_maxrss`). A peak
//! never goes down, so releasing caches cannot bring it back under the
//! ceiling; gauges reporting peaks say so through [`MemoryGauge::reports_peak`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default ceiling on resident memory before caches are released
pub const DEFAULT_MEMORY_CEILING: u64 = 200 * 1024 * 1024;

pub trait MemoryGauge: Send + Sync {
    /// Current resident set size in bytes
    fn resident_bytes(&self) -> Option<u64>;

    /// True when `resident_bytes` is a high-water mark rather than the
    /// current size
    fn reports_peak(&self) -> bool {
        false
    }
}

/// Reads the resident set size of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory;

impl MemoryGauge for ProcessMemory {
    fn resident_bytes(&self) -> Option<u64> {
        statm_resident().or_else(peak_resident)
    }

    fn reports_peak(&self) -> bool {
        statm_resident().is_none()
    }
}

#[cfg(target_os = "linux")]
fn statm_resident() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages * page_size as u64)
}

#[cfg(not(target_os = "linux"))]
fn statm_resident() -> Option<u64> {
    None
}

/// High-water mark from getrusage, for platforms without /proc
#[cfg(unix)]
fn peak_resident() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let max_rss = unsafe { usage.assume_init() }.ru_maxrss;
    let max_rss = u64::try_from(max_rss).ok()?;
    // macOS reports bytes, everything else kilobytes
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss * 1024)
    }
}

#[cfg(not(unix))]
fn peak_resident() -> Option<u64> {
    None
}

/// A gauge that reports whatever it was last set to.
/// Clones share the reading.
#[derive(Debug, Clone, Default)]
pub struct SyntheticMemory {
    bytes: Arc<AtomicU64>,
    peak: bool,
}

impl SyntheticMemory {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(bytes)),
            peak: false,
        }
    }

    /// A gauge that behaves like `ru_maxrss`: lower readings are ignored
    pub fn peak(bytes: u64) -> Self {
        Self {
            peak: true,
            ..Self::new(bytes)
        }
    }

    pub fn set(&self, bytes: u64) {
        if self.peak {
            self.bytes.fetch_max(bytes, Ordering::SeqCst);
        } else {
            self.bytes.store(bytes, Ordering::SeqCst);
        }
    }
}

impl MemoryGauge for SyntheticMemory {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }

    fn reports_peak(&self) -> bool {
        self.peak
    }
}
