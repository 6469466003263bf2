//! Cron expression parsing and next-fire computation.
//!
//! # Syntax
//! ```text
//! [TZ=<zone>|CRON_TZ=<zone>] [second] minute hour day-of-month month day-of-week
//! ```
//! - Five fields imply a leading `0` second
//! - Per field: `*`, `n`, `a-b`, `expr/k`, joined by commas
//! - Months accept `JAN..DEC`, weekdays accept `SUN..SAT` (case-insensitive)
//! - `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight`,
//!   `@hourly` and `@sunday..@saturday` replace the whole expression
//!
//! # Day matching
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either field matches. When one of them is `*`, both must match.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveDateTime,
    Timelike, Utc,
};
use thiserror::Error;

use crate::cron::zone::Zone;

/// How far ahead `next` searches before giving up.
pub const HORIZON_YEARS: i32 = 10;

/// Errors produced while compiling a cron expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid cron expression {expr:?}: {reason}")]
pub struct CronError {
    pub expr: String,
    pub reason: String,
}

impl CronError {
    fn new(expr: &str, reason: impl Into<String>) -> Self {
        Self {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

struct Bounds {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const SECOND: Bounds = Bounds { name: "second", min: 0, max: 59, names: &[] };
const MINUTE: Bounds = Bounds { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: Bounds = Bounds { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: Bounds = Bounds { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: Bounds = Bounds {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
};
const DAY_OF_WEEK: Bounds = Bounds {
    name: "day-of-week",
    min: 0,
    max: 6,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
};

fn alias(name: &str) -> Option<&'static str> {
    let expanded = match name.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        "@sunday" => "0 0 * * 0",
        "@monday" => "0 0 * * 1",
        "@tuesday" => "0 0 * * 2",
        "@wednesday" => "0 0 * * 3",
        "@thursday" => "0 0 * * 4",
        "@friday" => "0 0 * * 5",
        "@saturday" => "0 0 * * 6",
        _ => return None,
    };
    Some(expanded)
}

/// A compiled cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    second: u64,
    minute: u64,
    hour: u64,
    day_of_month: u64,
    month: u64,
    day_of_week: u64,
    dom_star: bool,
    dow_star: bool,
    zone: Zone,
}

impl CronSchedule {
    /// Compile an expression, rejecting schedules that never fire from now on.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        Self::parse_at(expr, Utc::now())
    }

    /// Compile an expression, checking schedulability relative to `now`.
    pub fn parse_at(expr: &str, now: DateTime<Utc>) -> Result<Self, CronError> {
        let schedule = Self::compile(expr)?;
        if schedule.next(now).is_none() {
            return Err(CronError::new(
                expr,
                format!("never fires within {} years", HORIZON_YEARS),
            ));
        }
        Ok(schedule)
    }

    fn compile(expr: &str) -> Result<Self, CronError> {
        let mut tokens: Vec<&str> = expr.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(CronError::new(expr, "empty expression"));
        }

        let mut zone = Zone::Local;
        let first = tokens[0];
        let zone_name = first
            .strip_prefix("CRON_TZ=")
            .or_else(|| first.strip_prefix("TZ="));
        if let Some(name) = zone_name {
            zone = Zone::parse(name).map_err(|reason| CronError::new(expr, reason))?;
            tokens.remove(0);
        }

        if tokens.len() == 1 && tokens[0].starts_with('@') {
            let expanded = alias(tokens[0])
                .ok_or_else(|| CronError::new(expr, format!("unknown alias {}", tokens[0])))?;
            tokens = expanded.split(' ').collect();
        }

        let fields: Vec<&str> = match tokens.len() {
            5 => std::iter::once("0").chain(tokens.iter().copied()).collect(),
            6 => tokens,
            n => {
                return Err(CronError::new(
                    expr,
                    format!("expected 5 or 6 fields, found {}", n),
                ))
            }
        };

        let parse = |field: &str, bounds: &Bounds| {
            parse_field(field, bounds).map_err(|reason| CronError::new(expr, reason))
        };
        let (second, _) = parse(fields[0], &SECOND)?;
        let (minute, _) = parse(fields[1], &MINUTE)?;
        let (hour, _) = parse(fields[2], &HOUR)?;
        let (day_of_month, dom_star) = parse(fields[3], &DAY_OF_MONTH)?;
        let (month, _) = parse(fields[4], &MONTH)?;
        let (day_of_week, dow_star) = parse(fields[5], &DAY_OF_WEEK)?;

        Ok(Self {
            second,
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
            dom_star,
            dow_star,
            zone,
        })
    }

    /// The zone the schedule is evaluated in.
    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// Smallest permitted instant strictly after `now`, or `None` if nothing
    /// fires within the search horizon.
    pub fn next(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let current = self.zone.to_wall(now).with_nanosecond(0)?;
        let limit = current.year() + HORIZON_YEARS;
        let ahead = self.next_ahead(now, current + ChronoDuration::seconds(1), limit);
        match self.replayed_in_fold(now, current, limit) {
            Some(replayed) => Some(ahead.map_or(replayed, |t| t.min(replayed))),
            None => ahead,
        }
    }

    fn next_ahead(&self, now: DateTime<Utc>, mut wall: NaiveDateTime, limit: i32) -> Option<DateTime<Utc>> {
        loop {
            let candidate = self.next_wall(wall, limit)?;
            match self.zone.from_wall(candidate) {
                LocalResult::Single(t) if t > now => return Some(t),
                LocalResult::Ambiguous(a, b) => {
                    let (earliest, latest) = (a.min(b), a.max(b));
                    if earliest > now {
                        return Some(earliest);
                    }
                    if latest > now {
                        return Some(latest);
                    }
                }
                // Skipped by a forward DST jump, or already behind `now`.
                _ => {}
            }
            wall = candidate + ChronoDuration::seconds(1);
        }
    }

    /// While `now` sits in the first pass of a DST fold, wall times up to
    /// `current` repeat after the fold. Returns the first permitted repeat.
    fn replayed_in_fold(&self, now: DateTime<Utc>, current: NaiveDateTime, limit: i32) -> Option<DateTime<Utc>> {
        let LocalResult::Ambiguous(a, b) = self.zone.from_wall(current) else {
            return None;
        };
        let (earliest, latest) = (a.min(b), a.max(b));
        if latest <= now {
            return None;
        }

        let mut wall = current - (latest - earliest) + ChronoDuration::seconds(1);
        while wall <= current {
            let candidate = self.next_wall(wall, limit)?;
            if candidate > current {
                return None;
            }
            if let LocalResult::Ambiguous(a, b) = self.zone.from_wall(candidate) {
                let repeat = a.max(b);
                if repeat > now {
                    return Some(repeat);
                }
            }
            wall = candidate + ChronoDuration::seconds(1);
        }
        None
    }

    /// First wall-clock time at or after `start` matching every field.
    fn next_wall(&self, start: NaiveDateTime, year_limit: i32) -> Option<NaiveDateTime> {
        let mut t = start;
        // Once any field advanced, all lower fields already sit at their minimum.
        let mut truncated = false;

        'wrap: loop {
            if t.year() > year_limit {
                return None;
            }

            while !has_bit(self.month, t.month()) {
                if !truncated {
                    truncated = true;
                    t = first_of_month(t.year(), t.month())?;
                }
                t = add_month(t)?;
                if t.month() == 1 {
                    continue 'wrap;
                }
            }

            while !self.day_matches(t.date()) {
                if !truncated {
                    truncated = true;
                    t = t.date().and_hms_opt(0, 0, 0)?;
                }
                t += ChronoDuration::days(1);
                if t.day() == 1 {
                    continue 'wrap;
                }
            }

            while !has_bit(self.hour, t.hour()) {
                if !truncated {
                    truncated = true;
                    t = t.date().and_hms_opt(t.hour(), 0, 0)?;
                }
                t += ChronoDuration::hours(1);
                if t.hour() == 0 {
                    continue 'wrap;
                }
            }

            while !has_bit(self.minute, t.minute()) {
                if !truncated {
                    truncated = true;
                    t = t.date().and_hms_opt(t.hour(), t.minute(), 0)?;
                }
                t += ChronoDuration::minutes(1);
                if t.minute() == 0 {
                    continue 'wrap;
                }
            }

            while !has_bit(self.second, t.second()) {
                truncated = true;
                t += ChronoDuration::seconds(1);
                if t.second() == 0 {
                    continue 'wrap;
                }
            }

            return Some(t);
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has_bit(self.day_of_month, date.day());
        let dow = has_bit(self.day_of_week, date.weekday().num_days_from_sunday());
        if self.dom_star || self.dow_star {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn has_bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn add_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    if t.month() == 12 {
        first_of_month(t.year() + 1, 1)
    } else {
        first_of_month(t.year(), t.month() + 1)
    }
}

/// Compile one field into a bitmask. The flag reports a bare wildcard.
fn parse_field(field: &str, bounds: &Bounds) -> Result<(u64, bool), String> {
    let mut mask = 0u64;
    let mut star = false;
    for part in field.split(',') {
        let (bits, part_star) = parse_range(part, bounds)?;
        mask |= bits;
        star |= part_star;
    }
    Ok((mask, star))
}

fn parse_range(part: &str, bounds: &Bounds) -> Result<(u64, bool), String> {
    if part.is_empty() {
        return Err(format!("empty {} term", bounds.name));
    }

    let mut pieces = part.split('/');
    let range = pieces.next().unwrap_or_default();
    let step = match pieces.next() {
        Some(raw) => {
            let step: u32 = raw
                .parse()
                .map_err(|_| format!("invalid step {:?} in {} field", raw, bounds.name))?;
            if step == 0 {
                return Err(format!("step must be at least 1 in {} field", bounds.name));
            }
            Some(step)
        }
        None => None,
    };
    if pieces.next().is_some() {
        return Err(format!("too many slashes in {:?}", part));
    }

    let (start, end, wildcard) = if range == "*" || range == "?" {
        (bounds.min, bounds.max, true)
    } else {
        match range.split_once('-') {
            Some((low, high)) => (parse_value(low, bounds)?, parse_value(high, bounds)?, false),
            None => {
                let value = parse_value(range, bounds)?;
                // `n/k` runs from n to the end of the field.
                let end = if step.is_some() { bounds.max } else { value };
                (value, end, false)
            }
        }
    };

    if start < bounds.min || end > bounds.max {
        return Err(format!(
            "{} value out of range {}-{}: {:?}",
            bounds.name, bounds.min, bounds.max, part
        ));
    }
    if start > end {
        return Err(format!("{} range start exceeds end: {:?}", bounds.name, part));
    }

    let step = step.unwrap_or(1);
    let mut bits = 0u64;
    let mut value = start;
    while value <= end {
        bits |= 1u64 << value;
        value += step;
    }
    Ok((bits, wildcard && step == 1))
}

fn parse_value(raw: &str, bounds: &Bounds) -> Result<u32, String> {
    if let Some(index) = bounds
        .names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(raw))
    {
        return Ok(index as u32 + bounds.min);
    }
    raw.parse::<u32>()
        .map_err(|_| format!("invalid {} value {:?}", bounds.name, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn next(expr: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        CronSchedule::parse_at(expr, now)
            .unwrap()
            .next(now)
            .unwrap()
    }

    #[test]
    fn test_last_second_of_31st() {
        let now = utc(2000, 2, 10, 0, 0, 0);
        assert_eq!(
            next("TZ=UTC 59 59 23 31 * *", now),
            utc(2000, 3, 31, 23, 59, 59)
        );
    }

    #[test]
    fn test_every_two_seconds_wraps_minute() {
        let now = utc(2000, 1, 1, 0, 0, 58);
        assert_eq!(next("TZ=UTC */2 * * * * *", now), utc(2000, 1, 1, 0, 1, 0));
    }

    #[test]
    fn test_five_fields_imply_zero_second() {
        let now = utc(2024, 5, 1, 10, 15, 30);
        assert_eq!(next("CRON_TZ=UTC */5 * * * *", now), utc(2024, 5, 1, 10, 20, 0));
    }

    #[test]
    fn test_next_is_strictly_after_now() {
        let now = utc(2024, 5, 1, 10, 20, 0);
        assert_eq!(next("TZ=UTC */5 * * * *", now), utc(2024, 5, 1, 10, 25, 0));
    }

    #[test]
    fn test_aliases() {
        let now = utc(2023, 6, 15, 12, 0, 0);
        assert_eq!(next("TZ=UTC @yearly", now), utc(2024, 1, 1, 0, 0, 0));
        assert_eq!(next("TZ=UTC @annually", now), utc(2024, 1, 1, 0, 0, 0));
        assert_eq!(next("TZ=UTC @monthly", now), utc(2023, 7, 1, 0, 0, 0));
        assert_eq!(next("TZ=UTC @daily", now), utc(2023, 6, 16, 0, 0, 0));
        assert_eq!(next("TZ=UTC @hourly", now), utc(2023, 6, 15, 13, 0, 0));
        // 2023-06-15 is a Thursday.
        assert_eq!(next("TZ=UTC @weekly", now), utc(2023, 6, 18, 0, 0, 0));
        assert_eq!(next("TZ=UTC @monday", now), utc(2023, 6, 19, 0, 0, 0));
        assert_eq!(next("TZ=UTC @saturday", now), utc(2023, 6, 17, 0, 0, 0));
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let now = utc(2023, 1, 1, 0, 0, 0);
        assert_eq!(
            next("TZ=UTC 0 0 0 1 mar *", now),
            utc(2023, 3, 1, 0, 0, 0)
        );
        assert_eq!(
            next("TZ=UTC 0 0 0 * * Fri", now),
            utc(2023, 1, 6, 0, 0, 0)
        );
    }

    #[test]
    fn test_ranges_lists_and_steps() {
        let now = utc(2023, 1, 1, 0, 0, 0);
        assert_eq!(
            next("TZ=UTC 0 10-20/5 9 * * *", now),
            utc(2023, 1, 1, 9, 10, 0)
        );
        let s = CronSchedule::parse_at("TZ=UTC 0 0 1,13,22 * * *", now).unwrap();
        let a = s.next(now).unwrap();
        let b = s.next(a).unwrap();
        let c = s.next(b).unwrap();
        assert_eq!((a.hour(), b.hour(), c.hour()), (1, 13, 22));
        // `n/k` runs to the end of the field.
        assert_eq!(next("TZ=UTC 50/5 * * * * *", now), utc(2023, 1, 1, 0, 0, 50));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 2023-01-02 is a Monday; the 15th comes later.
        let now = utc(2023, 1, 1, 0, 0, 0);
        assert_eq!(next("TZ=UTC 0 0 0 15 * MON", now), utc(2023, 1, 2, 0, 0, 0));
        // With a wildcard day-of-week, the day-of-month alone decides.
        assert_eq!(next("TZ=UTC 0 0 0 15 * *", now), utc(2023, 1, 15, 0, 0, 0));
    }

    #[test]
    fn test_leap_day() {
        let now = utc(2021, 3, 1, 0, 0, 0);
        assert_eq!(next("TZ=UTC 0 0 29 2 *", now), utc(2024, 2, 29, 0, 0, 0));
    }

    #[test]
    fn test_rejects_malformed() {
        let now = utc(2023, 1, 1, 0, 0, 0);
        for expr in [
            "",
            "* * * *",
            "* * * * * * *",
            "*/0 * * * *",
            "*/x * * * *",
            "60 * * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 7",
            "5-1 * * * *",
            "1,,2 * * * *",
            "@fortnightly",
            "TZ=Nowhere/Special * * * * *",
            "* * * FOO *",
        ] {
            assert!(CronSchedule::parse_at(expr, now).is_err(), "accepted {:?}", expr);
        }
    }

    #[test]
    fn test_rejects_unschedulable() {
        let now = utc(2023, 1, 1, 0, 0, 0);
        let err = CronSchedule::parse_at("* * 30 2 *", now).unwrap_err();
        assert!(err.reason.contains("never fires"));
        assert!(CronSchedule::parse_at("0 0 31 4 *", now).is_err());
    }

    #[test]
    fn test_next_never_skips_a_permitted_instant() {
        let now = utc(2023, 12, 31, 23, 58, 0);
        let schedule = CronSchedule::parse_at("TZ=UTC */7 * * * * *", now).unwrap();
        let mut t = now;
        for _ in 0..50 {
            let n = schedule.next(t).unwrap();
            assert!(n > t);
            assert_eq!(n.second() % 7, 0);
            // Brute-force: nothing permitted strictly between t and n.
            let mut probe = t + ChronoDuration::seconds(1);
            while probe < n {
                assert_ne!(probe.second() % 7, 0, "skipped {}", probe);
                probe += ChronoDuration::seconds(1);
            }
            t = n;
        }
    }

    #[test]
    fn test_skips_dst_gap() {
        // 02:30 does not exist in New York on 2021-03-14.
        let zone = "TZ=America/New_York";
        let now = utc(2021, 3, 14, 6, 0, 0); // 01:00 EST
        let fire = next(&format!("{} 0 30 2 * * *", zone), now);
        // Next 02:30 wall time is the following day (EDT, UTC-4).
        assert_eq!(fire, utc(2021, 3, 15, 6, 30, 0));
    }

    #[test]
    fn test_repeated_hour_fires_again_after_fold() {
        // New York falls back from 02:00 EDT to 01:00 EST on 2021-11-07.
        let hourly = "TZ=America/New_York 0 0 * * * *";
        let now = utc(2021, 11, 7, 5, 30, 0); // 01:30 EDT
        // 01:00 EST comes before 02:00 EST.
        assert_eq!(next(hourly, now), utc(2021, 11, 7, 6, 0, 0));
        assert_eq!(next(hourly, utc(2021, 11, 7, 6, 0, 0)), utc(2021, 11, 7, 7, 0, 0));

        // A later wall time in the first pass still wins over an earlier repeat.
        let twice = "TZ=America/New_York 0 10,50 1 * * *";
        assert_eq!(next(twice, now), utc(2021, 11, 7, 5, 50, 0)); // 01:50 EDT
        assert_eq!(next(twice, utc(2021, 11, 7, 5, 50, 0)), utc(2021, 11, 7, 6, 10, 0)); // 01:10 EST
        assert_eq!(next(twice, utc(2021, 11, 7, 6, 10, 0)), utc(2021, 11, 7, 6, 50, 0)); // 01:50 EST
    }
}
