//! Duration-string handling.
//!
//! Config timeouts are humantime strings ("200ms", "1s", "5m"). An empty
//! string or "0" means the timeout is disabled.

use std::time::Duration;

/// Parse a config duration; `None` means disabled.
///
/// Unparseable values also yield `None` (validation reports them upfront,
/// the hot path just treats them as disabled).
pub fn parse_opt(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "0" {
        return None;
    }
    humantime::parse_duration(s)
        .ok()
        .filter(|d| !d.is_zero())
}

/// Parse a config duration with a fallback for disabled/invalid values
pub fn parse_or(s: &str, default: Duration) -> Duration {
    parse_opt(s).unwrap_or(default)
}

/// Whether a config duration string is well-formed ("0", "" or humantime)
pub fn is_valid(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s == "0" || humantime::parse_duration(s).is_ok()
}
