//! Archive file naming.
//!
//! ```text
//! active:   <base><ext>
//! rotated:  <base>[.<timestamp>].<id><ext>
//! archived: <base>[.<timestamp>].<id><ext>[.gz]
//! ```

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::cron::Zone;

pub const GZIP_SUFFIX: &str = ".gz";

/// Go reference-time tokens and their strftime equivalents, longest first.
const GO_LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("15", "%H"),
    ("PM", "%p"),
];

/// Translate a Go-style layout (`2006-01-02_15-04-05`) to strftime.
/// Layouts that already contain `%` are taken as strftime.
pub fn go_layout_to_strftime(layout: &str) -> String {
    if layout.contains('%') {
        return layout.to_string();
    }
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'scan: while !rest.is_empty() {
        for (token, spec) in GO_LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Timestamp layout evaluated in a zone.
#[derive(Debug, Clone)]
pub struct TimeLayout {
    format: String,
    zone: Zone,
}

impl TimeLayout {
    pub fn new(layout: &str, zone: Zone) -> Self {
        Self {
            format: go_layout_to_strftime(layout),
            zone,
        }
    }

    pub fn format(&self, instant: DateTime<Utc>) -> String {
        self.zone.to_wall(instant).format(&self.format).to_string()
    }

    /// Recover the instant a timestamp was taken at.
    pub fn parse(&self, raw: &str) -> Option<DateTime<Utc>> {
        let wall = NaiveDateTime::parse_from_str(raw, &self.format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(raw, &self.format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        self.zone.from_wall(wall).earliest()
    }
}

/// A file name recognised as a rotated or archived segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub timestamp: Option<String>,
    pub id: u64,
    pub gzipped: bool,
}

/// Name scheme for one logical file.
#[derive(Debug, Clone)]
pub struct Naming {
    base: String,
    ext: String,
    layout: Option<TimeLayout>,
}

impl Naming {
    /// Split `file_name` into base and extension (`gateway.log` → `gateway`, `.log`).
    pub fn new(file_name: &str, layout: Option<TimeLayout>) -> Self {
        let (base, ext) = match file_name.rfind('.') {
            Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
            _ => (file_name, ""),
        };
        Self {
            base: base.to_string(),
            ext: ext.to_string(),
            layout,
        }
    }

    pub fn active_name(&self) -> String {
        format!("{}{}", self.base, self.ext)
    }

    pub fn layout(&self) -> Option<&TimeLayout> {
        self.layout.as_ref()
    }

    /// Timestamp for a rotation happening at `instant`, if a layout is set.
    pub fn timestamp(&self, instant: DateTime<Utc>) -> Option<String> {
        self.layout.as_ref().map(|l| l.format(instant))
    }

    pub fn rotated_name(&self, timestamp: Option<&str>, id: u64) -> String {
        match timestamp {
            Some(ts) => format!("{}.{}.{}{}", self.base, ts, id, self.ext),
            None => format!("{}.{}{}", self.base, id, self.ext),
        }
    }

    /// Recognise `<base>[.<timestamp>].<id><ext>[.gz]`.
    pub fn parse(&self, file_name: &str) -> Option<ArchiveName> {
        let (name, gzipped) = match file_name.strip_suffix(GZIP_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (file_name, false),
        };
        let name = name.strip_suffix(self.ext.as_str())?;
        let middle = name.strip_prefix(self.base.as_str())?.strip_prefix('.')?;

        let (timestamp, id) = match &self.layout {
            Some(_) => {
                let (ts, id) = middle.rsplit_once('.')?;
                if ts.is_empty() {
                    return None;
                }
                (Some(ts.to_string()), id)
            }
            None => (None, middle),
        };
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(ArchiveName {
            timestamp,
            id: id.parse().ok()?,
            gzipped,
        })
    }

    /// One more than the largest id already used with `timestamp` in any of
    /// `dirs`, or 0 when none is.
    pub fn next_id(&self, timestamp: Option<&str>, dirs: &[&Path]) -> u64 {
        let mut next = 0;
        for dir in dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(parsed) = file_name.to_str().and_then(|n| self.parse(n)) else {
                    continue;
                };
                if parsed.timestamp.as_deref() == timestamp {
                    next = next.max(parsed.id + 1);
                }
            }
        }
        next
    }
}
