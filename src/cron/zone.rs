//! Named time zones shared by the scheduler and the rotating log writer.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A time zone used to evaluate wall-clock times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zone {
    /// The process-local zone.
    #[default]
    Local,
    /// An IANA zone such as `UTC` or `Asia/Tokyo`.
    Named(Tz),
}

impl Zone {
    /// Resolve a zone name. Empty and `Local` select the process-local zone.
    pub fn parse(name: &str) -> Result<Self, String> {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("local") {
            return Ok(Zone::Local);
        }
        name.parse::<Tz>()
            .map(Zone::Named)
            .map_err(|_| format!("unknown time zone {:?}", name))
    }

    /// Wall-clock reading of an instant in this zone.
    pub fn to_wall(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => instant.with_timezone(&chrono::Local).naive_local(),
            Zone::Named(tz) => instant.with_timezone(tz).naive_local(),
        }
    }

    /// Instants matching a wall-clock reading. Empty inside a DST gap,
    /// two candidates inside a DST fold.
    pub fn from_wall(&self, wall: NaiveDateTime) -> LocalResult<DateTime<Utc>> {
        match self {
            Zone::Local => chrono::Local
                .from_local_datetime(&wall)
                .map(|t| t.with_timezone(&Utc)),
            Zone::Named(tz) => tz.from_local_datetime(&wall).map(|t| t.with_timezone(&Utc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_zone_names() {
        assert_eq!(Zone::parse("").unwrap(), Zone::Local);
        assert_eq!(Zone::parse("Local").unwrap(), Zone::Local);
        assert_eq!(Zone::parse("UTC").unwrap(), Zone::Named(Tz::UTC));
        assert!(Zone::parse("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn test_gap_has_no_instant() {
        let zone = Zone::parse("America/New_York").unwrap();
        // 2021-03-14 02:30 does not exist in New York.
        let wall = NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        assert!(matches!(zone.from_wall(wall), LocalResult::None));
    }
}
