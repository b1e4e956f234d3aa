//! Small helpers shared across the crate
//!
//! String truncation that respects UTF-8 boundaries (used for log previews of
//! protocol lines, which frequently carry emoji or non-ASCII text) and
//! human-readable durations for timeout messages.

use std::time::Duration;

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character
///
/// ```
/// use agent_control_client::utils::safe_truncate;
///
/// // the magnifier starts at byte 8 and takes four bytes
/// assert_eq!(safe_truncate("Status: 🔍 Active", 10), "Status: ");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|&index| s.is_char_boundary(index))
        .unwrap_or(0);
    &s[..end]
}

/// [`safe_truncate`], with `...` appended when anything was cut
///
/// ```
/// use agent_control_client::utils::truncate_for_display;
///
/// assert_eq!(truncate_for_display("control_request", 7), "control...");
/// ```
#[must_use]
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    match safe_truncate(s, max_bytes) {
        whole if whole.len() == s.len() => whole.to_string(),
        prefix => format!("{prefix}..."),
    }
}

/// Format a duration with a unit that fits its magnitude.
///
/// Sub-second values are shown in milliseconds, whole seconds without a
/// fraction, everything else with one decimal.
///
/// # Example
/// ```
/// use agent_control_client::utils::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
/// assert_eq!(format_duration(&Duration::from_millis(500)), "500ms");
/// assert_eq!(format_duration(&Duration::from_millis(1500)), "1.5s");
/// ```
#[must_use]
pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis % 1000 == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
