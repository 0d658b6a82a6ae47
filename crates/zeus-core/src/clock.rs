//! Wall-clock helpers.
//!
//! All bus timestamps are epoch seconds (fractional) from the same OS clock;
//! staleness and retry scheduling are advisory, so no monotonic-clock
//! discipline is needed across processes on one host.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as fractional epoch seconds.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current time as whole epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
