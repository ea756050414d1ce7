//! Reminder time expressions.
//!
//! Accepts four families of input:
//! - compact units: `10s`, `5m`, `2h`, `1d`
//! - natural units: `5 minutes`, `in 2 hours`
//! - named days and parts of day: `tomorrow morning`, `next monday afternoon`
//! - clock times: `at 14:30`, `9pm`
//!
//! Day references without a time default to 09:00 in the configured zone
//! (a fixed offset, or the host zone when none is configured).

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Utc, Weekday,
};
use regex::Regex;
use std::sync::OnceLock;

/// Hour used when a day is named without a time.
const DEFAULT_HOUR: u32 = 9;

/// A parsed delivery target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTime {
    /// Absolute delivery instant.
    pub deliver_at: DateTime<Utc>,
    /// Whole seconds until delivery, clamped at zero.
    pub delay_secs: i64,
}

/// Parse a time expression relative to `now`.
///
/// `offset` selects the zone for absolute references; `None` means the
/// host's local zone. Returns `None` when the input matches no supported
/// form.
pub fn parse_delivery(
    input: &str,
    now: DateTime<Utc>,
    offset: Option<FixedOffset>,
) -> Option<DeliveryTime> {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    let deliver_at = parse_duration(&normalized)
        .and_then(|d| now.checked_add_signed(d))
        .or_else(|| parse_absolute(&normalized, now, offset))?;

    let delay_secs = deliver_at.signed_duration_since(now).num_seconds().max(0);
    Some(DeliveryTime {
        deliver_at,
        delay_secs,
    })
}

/// Relative forms: `10s`, `5 m`, `in 2 hours`, `1 day`.
fn parse_duration(input: &str) -> Option<Duration> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^(?:in\s+)?(\d{1,4})\s*(s|secs?|seconds?|m|mins?|minutes?|h|hrs?|hours?|d|days?)$",
        )
        .expect("duration regex is valid")
    });

    let caps = re.captures(input)?;
    let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str();

    match unit.chars().next()? {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        _ => None,
    }
}

/// Absolute forms: named days, parts of day, clock times, and combinations.
fn parse_absolute(
    input: &str,
    now: DateTime<Utc>,
    offset: Option<FixedOffset>,
) -> Option<DateTime<Utc>> {
    let (local_now, zone) = local_parts(now, offset);

    let mut day_offset: Option<i64> = None;
    let mut time: Option<(u32, u32)> = None;
    let mut matched_words: usize = 0;

    let words: Vec<&str> = input
        .split_whitespace()
        .filter(|w| *w != "at" && *w != "in" && *w != "on")
        .collect();
    let total_words = words.len();

    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        let next = words.get(i.saturating_add(1)).copied();

        if word == "today" {
            day_offset = Some(0);
            matched_words = matched_words.saturating_add(1);
        } else if word == "tomorrow" {
            day_offset = Some(1);
            matched_words = matched_words.saturating_add(1);
        } else if word == "next" {
            if let Some(wd) = next.and_then(parse_weekday) {
                day_offset = Some(days_until(local_now.date(), wd));
                matched_words = matched_words.saturating_add(2);
                i = i.saturating_add(1);
            }
        } else if let Some(wd) = parse_weekday(word) {
            day_offset = Some(days_until(local_now.date(), wd));
            matched_words = matched_words.saturating_add(1);
        } else if let Some(t) = parse_part_of_day(word) {
            time = Some(t);
            matched_words = matched_words.saturating_add(1);
        } else if let Some(t) = parse_clock(word) {
            time = Some(t);
            matched_words = matched_words.saturating_add(1);
        }

        i = i.saturating_add(1);
    }

    // Reject inputs with unrecognized words so arbitrary text does not
    // accidentally parse ("remind me about monday's meeting" is not a time).
    if matched_words == 0 || matched_words != total_words {
        return None;
    }

    let (hour, minute) = time.unwrap_or((DEFAULT_HOUR, 0));
    let target_time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let target_date = match day_offset {
        Some(days) => local_now
            .date()
            .checked_add_signed(Duration::days(days))?,
        None => {
            // Time-only reference: today, or tomorrow once passed.
            if target_time > local_now.time() {
                local_now.date()
            } else {
                local_now.date().checked_add_signed(Duration::days(1))?
            }
        }
    };

    let target = NaiveDateTime::new(target_date, target_time);
    zone.from_local_datetime(&target)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The naive local clock and the zone it lives in.
fn local_parts(now: DateTime<Utc>, offset: Option<FixedOffset>) -> (NaiveDateTime, FixedOffset) {
    match offset {
        Some(off) => (now.with_timezone(&off).naive_local(), off),
        None => {
            let local = now.with_timezone(&Local);
            (local.naive_local(), local.offset().fix())
        }
    }
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Days from `today` until the next occurrence of the target weekday.
///
/// Today's own weekday means one week out.
fn days_until(today: NaiveDate, target: Weekday) -> i64 {
    let today_num = i64::from(today.weekday().num_days_from_monday());
    let target_num = i64::from(target.num_days_from_monday());
    let days = target_num.saturating_sub(today_num).rem_euclid(7);
    if days == 0 {
        7
    } else {
        days
    }
}

fn parse_part_of_day(word: &str) -> Option<(u32, u32)> {
    match word {
        "morning" => Some((9, 0)),
        "noon" | "midday" => Some((12, 0)),
        "afternoon" => Some((15, 0)),
        "evening" => Some((19, 0)),
        "night" => Some((21, 0)),
        _ => None,
    }
}

/// Clock forms: `14:30`, `9pm`, `9:15am`, `21:00`.
fn parse_clock(word: &str) -> Option<(u32, u32)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})(?::(\d{2}))?(am|pm)?$")
            .expect("clock regex is valid")
    });

    let caps = re.captures(word)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let meridiem = caps.get(3).map(|m| m.as_str());

    // A bare number with no colon and no meridiem is ambiguous ("5" could
    // be a count); require one of the two.
    if caps.get(2).is_none() && meridiem.is_none() {
        return None;
    }

    match meridiem {
        Some("pm") if hour < 12 => hour = hour.saturating_add(12),
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }

    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid test timestamp")
    }

    /// Fixed zone so tests never depend on the host's clock settings.
    fn zone() -> Option<FixedOffset> {
        FixedOffset::east_opt(0)
    }

    // Wednesday 2026-07-01, 12:00 UTC.
    fn now() -> DateTime<Utc> {
        utc("2026-07-01T12:00:00Z")
    }

    fn deliver(input: &str) -> Option<DeliveryTime> {
        parse_delivery(input, now(), zone())
    }

    #[test]
    fn test_compact_units() {
        assert_eq!(deliver("10s").expect("parses").delay_secs, 10);
        assert_eq!(deliver("5m").expect("parses").delay_secs, 300);
        assert_eq!(deliver("2h").expect("parses").delay_secs, 7200);
        assert_eq!(deliver("1d").expect("parses").delay_secs, 86400);
    }

    #[test]
    fn test_natural_units() {
        assert_eq!(deliver("5 minutes").expect("parses").delay_secs, 300);
        assert_eq!(deliver("in 2 hours").expect("parses").delay_secs, 7200);
        assert_eq!(deliver("1 day").expect("parses").delay_secs, 86400);
    }

    #[test]
    fn test_clock_time_later_today() {
        let d = deliver("at 14:30").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-01T14:30:00Z"));
    }

    #[test]
    fn test_clock_time_already_passed_rolls_to_tomorrow() {
        let d = deliver("at 9:00").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-02T09:00:00Z"));
    }

    #[test]
    fn test_meridiem() {
        let d = deliver("9pm").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-01T21:00:00Z"));

        let d = deliver("12am").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-02T00:00:00Z"));
    }

    #[test]
    fn test_tomorrow_defaults_to_nine() {
        let d = deliver("tomorrow").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-02T09:00:00Z"));
    }

    #[test]
    fn test_tomorrow_morning() {
        let d = deliver("tomorrow morning").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-02T09:00:00Z"));
    }

    #[test]
    fn test_next_monday_afternoon() {
        // 2026-07-01 is a Wednesday; next Monday is 2026-07-06.
        let d = deliver("next monday afternoon").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-06T15:00:00Z"));
    }

    #[test]
    fn test_bare_weekday_same_day_means_next_week() {
        let d = deliver("wednesday").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-08T09:00:00Z"));
    }

    #[test]
    fn test_combined_day_and_clock() {
        let d = deliver("tomorrow at 14:30").expect("parses");
        assert_eq!(d.deliver_at, utc("2026-07-02T14:30:00Z"));
    }

    #[test]
    fn test_fixed_offset_changes_wall_clock() {
        let d = parse_delivery("tomorrow", now(), FixedOffset::east_opt(7200))
            .expect("parses");
        // 09:00 at +02:00 is 07:00 UTC.
        assert_eq!(d.deliver_at, utc("2026-07-02T07:00:00Z"));
    }

    #[test]
    fn test_unparseable_inputs() {
        assert!(deliver("").is_none());
        assert!(deliver("whenever").is_none());
        assert!(deliver("remind me about monday's meeting").is_none());
        assert!(deliver("5").is_none(), "bare numbers are ambiguous");
        assert!(deliver("25:99").is_none());
    }
}
