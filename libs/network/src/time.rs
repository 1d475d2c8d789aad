//! Wall-clock helpers
//!
//! Exchange payloads carry millisecond epochs; internal bookkeeping uses
//! nanoseconds. Both saturate instead of panicking when the clock is unusable.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Convert a duration to nanoseconds, saturating at `u64::MAX`
pub fn safe_duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Nanoseconds since the Unix epoch, or 0 if the system clock is before 1970
pub fn safe_system_timestamp_ns() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => safe_duration_to_ns(duration),
        Err(e) => {
            tracing::warn!(error = %e, "System time before UNIX epoch");
            0
        }
    }
}

/// Milliseconds since the Unix epoch, or 0 if the system clock is before 1970
pub fn safe_system_timestamp_ms() -> u64 {
    safe_system_timestamp_ns() / 1_000_000
}
