//! Host services: monotonic uptime, sleep, and the thread wrapper.

pub mod thread;

pub use thread::{Thread, ThreadOptions, ThreadSignal};

use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

static BOOT: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic time elapsed since the process started.
///
/// All driver timestamps (level changes, pulse switches) are expressed on
/// this clock, so they can be compared and subtracted freely.
pub fn uptime() -> Duration {
    BOOT.elapsed()
}

/// Suspend the calling thread for `duration`.
pub fn sleep(duration: Duration) {
    std::thread::sleep(duration);
}
