//! Timestamp utilities
//!
//! All stored timestamps are epoch milliseconds (UTC). The mobile client
//! syncs wall-clock times that can drift by seconds between devices, so
//! comparisons against stored values should never assume exactness.

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC timestamp as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
