//! Time source abstraction
//!
//! The NFC liveness monitor and transports stamp their last activity with a
//! monotonic-enough millisecond clock. Tests substitute their own.

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
