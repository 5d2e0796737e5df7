//! Microsecond timestamps.
//!
//! Every persisted record carries integer microseconds since the Unix epoch.
//! Timeline reconstruction across mixed LLM/tool events sorts on these
//! values and nothing else, so all capture sites must stamp through
//! [`now_us`].

use chrono::Utc;

/// Current time as microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Render a microsecond timestamp as RFC 3339 for API responses.
pub fn us_to_rfc3339(us: i64) -> String {
    chrono::DateTime::from_timestamp_micros(us)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
