use chrono::{DateTime, Utc};

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Signed span of time
///
/// Signed so that `until` on a past instant reports a negative span
/// instead of saturating.
pub type Duration = chrono::Duration;

/// Convert a signed duration to a `std::time::Duration`, clamping
/// negative spans to zero.
pub fn to_std_duration(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or(std::time::Duration::ZERO)
}
