//! Duration strings ("500ms", "5s", "2m", "1h", "30d") and wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parse a duration string like "5s", "500ms", "1m", "2h", "7d".
///
/// A bare number is read as seconds. Values too large for `u64` seconds
/// yield `None`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        scaled(secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        scaled(mins, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled(hours, 3600)
    } else if let Some(days) = s.strip_suffix('d') {
        scaled(days, 86_400)
    } else {
        scaled(s, 1)
    }
}

fn scaled(number: &str, unit_secs: u64) -> Option<Duration> {
    let n = number.trim().parse::<u64>().ok()?;
    n.checked_mul(unit_secs).map(Duration::from_secs)
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
