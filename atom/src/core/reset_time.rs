//! Extract the reset instant embedded in a session-limit message.

use std::sync::LazyLock;

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use regex::Regex;

static EPOCH_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|\s*(\d{9,11})\b").expect("valid epoch regex"));

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bresets?\s+(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b")
        .expect("valid clock regex")
});

/// Parse a reset time out of `text`, relative to `now`.
///
/// Two forms are recognized, first match wins:
/// - a `|<unix-seconds>` suffix, as in `usage limit reached|1760000000`;
/// - `resets [at] H[:MM] am|pm`, read in `now`'s timezone as the next such
///   wall-clock time strictly after `now`.
pub fn parse_reset_time<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    if let Some(caps) = EPOCH_SUFFIX_RE.captures(text) {
        let secs: i64 = caps[1].parse().ok()?;
        return DateTime::from_timestamp(secs, 0);
    }

    let caps = CLOCK_RE.captures(text)?;
    let hour12: u32 = caps[1].parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if !(1..=12).contains(&hour12) || minute > 59 {
        return None;
    }
    let pm = caps[3].eq_ignore_ascii_case("pm");
    let hour = match (hour12, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let local_now = now.naive_local();
    let mut candidate = local_now.date().and_time(time);
    if candidate <= local_now {
        candidate = candidate.checked_add_days(Days::new(1))?;
    }
    let resolved = now.timezone().from_local_datetime(&candidate).earliest()?;
    Some(resolved.with_timezone(&Utc))
}
