//! Monotonic millisecond clock for PING timestamps and RTT samples.
//!
//! Timestamps are milliseconds since the first call in this process,
//! truncated to 32 bits. RTT is computed with wrapping subtraction so a
//! sample taken across the ~49.7 day wrap is still correct.

use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since the process clock started, wrapping at 2^32.
pub fn monotonic_ms() -> u32 {
    EPOCH.elapsed().as_millis() as u32
}

/// Round-trip time for a PONG echoing `send_time_ms`, measured at `now_ms`.
pub fn rtt_since(send_time_ms: u32, now_ms: u32) -> Duration {
    Duration::from_millis(u64::from(now_ms.wrapping_sub(send_time_ms)))
}
