//! DateTime utilities.
//!
//! Timestamp helpers shared by the logger and the rate limiter.

use chrono::{DateTime, SecondsFormat, Utc};

/// Get the current UTC time.
///
/// # Examples
///
/// ```
/// use taskboard_common::datetime::now_utc;
///
/// let now = now_utc();
/// println!("Current time: {}", now);
/// ```
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Format a DateTime as an RFC 3339 timestamp with millisecond precision and a `Z` suffix.
///
/// This is the timestamp format used in log records and error bodies.
///
/// # Examples
///
/// ```
/// use chrono::{DateTime, Utc};
/// use taskboard_common::datetime::format_timestamp;
///
/// let dt = DateTime::parse_from_rfc3339("2023-12-01T12:30:45Z")
///     .unwrap()
///     .with_timezone(&Utc);
/// assert_eq!(format_timestamp(&dt), "2023-12-01T12:30:45.000Z");
/// ```
pub fn format_timestamp(datetime: &DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whole seconds from `now` until `deadline`, rounded up.
///
/// Returns 0 when the deadline has already passed.
///
/// # Examples
///
/// ```
/// use chrono::Duration;
/// use taskboard_common::datetime::{now_utc, seconds_until};
///
/// let now = now_utc();
/// assert_eq!(seconds_until(&now, &(now + Duration::milliseconds(1500))), 2);
/// assert_eq!(seconds_until(&now, &(now - Duration::seconds(3))), 0);
/// ```
pub fn seconds_until(now: &DateTime<Utc>, deadline: &DateTime<Utc>) -> u64 {
    let millis = (*deadline - *now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis as u64).div_ceil(1000)
}
