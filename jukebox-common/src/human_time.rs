//! Human-readable track durations
//!
//! Track lengths travel as clock strings (`SS`, `M:SS`, `H:MM:SS`) both
//! from the downloader's probe output and to listeners in queue listings.

use std::time::Duration;

/// Parse a clock-style duration string.
///
/// Accepts `SS`, `M:SS` and `H:MM:SS`. Components are right-aligned, so the
/// last field is always seconds. Returns `None` for empty input, more than
/// three fields, or non-numeric fields.
///
/// # Examples
///
/// ```
/// use jukebox_common::human_time::parse_clock;
/// use std::time::Duration;
///
/// assert_eq!(parse_clock("42"), Some(Duration::from_secs(42)));
/// assert_eq!(parse_clock("3:05"), Some(Duration::from_secs(185)));
/// assert_eq!(parse_clock("1:00:01"), Some(Duration::from_secs(3601)));
/// assert_eq!(parse_clock("abc"), None);
/// ```
pub fn parse_clock(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let fields: Vec<&str> = text.split(':').collect();
    if fields.len() > 3 {
        return None;
    }

    let mut total: u64 = 0;
    for field in &fields {
        let value: u64 = field.trim().parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }

    Some(Duration::from_secs(total))
}

/// Format a duration as `M:SS`, or `H:MM:SS` once it reaches an hour.
///
/// ```
/// use jukebox_common::human_time::format_clock;
/// use std::time::Duration;
///
/// assert_eq!(format_clock(Duration::from_secs(185)), "3:05");
/// assert_eq!(format_clock(Duration::from_secs(3661)), "1:01:01");
/// ```
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
