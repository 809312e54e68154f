use chrono::{DateTime, Timelike, Utc};

/// Truncate a timestamp to the start of its one-minute window, in UTC.
/// Used as the time component of aggregate row keys.
pub fn bucket_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .expect("zeroing sub-minute precision is always valid")
}
