//! Backup retention by count, age and total size.
//!
//! # Ordering
//! Archives are ranked newest first (ascending age); equal ages rank the
//! higher id first. Walking that order:
//! - index >= `max_backups` is evicted
//! - age > `max_age_secs` is evicted
//! - a file that pushes the running total over `max_total_bytes` is evicted
//!
//! Each bound applies only when it is non-zero.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::logfile::naming::Naming;
use crate::logfile::retry_once;

/// Limits applied to the destination directory after each rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_backups: usize,
    pub max_age_secs: u64,
    pub max_total_bytes: u64,
}

impl RetentionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_backups == 0 && self.max_age_secs == 0 && self.max_total_bytes == 0
    }
}

/// Bookkeeping for one archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub age_secs: i64,
    pub id: u64,
}

/// List the archives in `dir`. Files whose timestamp suffix does not parse
/// are left out. Without a layout, modification time stands in for the
/// creation time.
pub fn collect(naming: &Naming, dir: &Path, now: DateTime<Utc>) -> Vec<ArchiveRecord> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(parsed) = file_name.to_str().and_then(|n| naming.parse(n)) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }

        let created = match (&parsed.timestamp, naming.layout()) {
            (Some(ts), Some(layout)) => match layout.parse(ts) {
                Some(t) => t,
                None => continue,
            },
            _ => match meta.modified() {
                Ok(t) => DateTime::<Utc>::from(t),
                Err(_) => continue,
            },
        };

        records.push(ArchiveRecord {
            path: entry.path(),
            size_bytes: meta.len(),
            age_secs: (now - created).num_seconds(),
            id: parsed.id,
        });
    }
    records
}

/// Decide which records to delete. Pure; the caller performs the removal.
pub fn select_evictions(mut records: Vec<ArchiveRecord>, policy: &RetentionPolicy) -> Vec<ArchiveRecord> {
    records.sort_by(|a, b| a.age_secs.cmp(&b.age_secs).then(b.id.cmp(&a.id)));

    let mut evicted = Vec::new();
    let mut total: u64 = 0;
    for (index, record) in records.into_iter().enumerate() {
        if policy.max_backups > 0 && index >= policy.max_backups {
            evicted.push(record);
            continue;
        }
        if policy.max_age_secs > 0 && record.age_secs > policy.max_age_secs as i64 {
            evicted.push(record);
            continue;
        }
        total += record.size_bytes;
        if policy.max_total_bytes > 0 && total > policy.max_total_bytes {
            total -= record.size_bytes;
            evicted.push(record);
        }
    }
    evicted
}

/// Apply `policy` to `dir`. Deletion failures are logged only.
/// Returns the number of files removed.
pub fn enforce(naming: &Naming, dir: &Path, policy: &RetentionPolicy, now: DateTime<Utc>) -> usize {
    if policy.is_unbounded() {
        return 0;
    }
    let mut removed = 0;
    for record in select_evictions(collect(naming, dir, now), policy) {
        match retry_once(|| fs::remove_file(&record.path)) {
            Ok(()) => {
                removed += 1;
                tracing::debug!(file = %record.path.display(), age_secs = record.age_secs, "Removed expired log archive");
            }
            Err(e) => {
                tracing::warn!(file = %record.path.display(), error = %e, "Failed to remove log archive");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::Zone;
    use crate::logfile::naming::TimeLayout;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn record(name: &str, size: u64, age: i64, id: u64) -> ArchiveRecord {
        ArchiveRecord {
            path: PathBuf::from(name),
            size_bytes: size,
            age_secs: age,
            id,
        }
    }

    fn names(records: &[ArchiveRecord]) -> Vec<String> {
        records.iter().map(|r| r.path.display().to_string()).collect()
    }

    #[test]
    fn test_max_backups_keeps_newest() {
        let records = vec![
            record("old", 1, 300, 0),
            record("new", 1, 10, 2),
            record("mid", 1, 100, 1),
        ];
        let policy = RetentionPolicy { max_backups: 2, ..Default::default() };
        assert_eq!(names(&select_evictions(records, &policy)), vec!["old"]);
    }

    #[test]
    fn test_equal_age_prefers_higher_id() {
        let records = vec![record("a", 1, 5, 1), record("b", 1, 5, 3), record("c", 1, 5, 2)];
        let policy = RetentionPolicy { max_backups: 1, ..Default::default() };
        let mut evicted = names(&select_evictions(records, &policy));
        evicted.sort();
        assert_eq!(evicted, vec!["a", "c"]);
    }

    #[test]
    fn test_max_age() {
        let records = vec![record("fresh", 1, 59, 0), record("stale", 1, 61, 1)];
        let policy = RetentionPolicy { max_age_secs: 60, ..Default::default() };
        assert_eq!(names(&select_evictions(records, &policy)), vec!["stale"]);
    }

    #[test]
    fn test_max_total_size_skips_offenders_only() {
        let records = vec![
            record("a", 40, 1, 0),
            record("big", 100, 2, 0),
            record("b", 40, 3, 0),
            record("c", 40, 4, 0),
        ];
        let policy = RetentionPolicy { max_total_bytes: 100, ..Default::default() };
        let evicted = select_evictions(records, &policy);
        assert_eq!(names(&evicted), vec!["big", "c"]);
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let records = vec![record("a", 1_000, 1_000_000, 0)];
        assert!(select_evictions(records, &RetentionPolicy::default()).is_empty());
    }

    #[test]
    fn test_collect_parses_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let layout = TimeLayout::new("2006-01-02_15-04-05", Zone::Named(Tz::UTC));
        let naming = Naming::new("app.log", Some(layout));
        fs::write(dir.path().join("app.2024-01-01_00-00-00.0.log.gz"), b"abc").unwrap();
        fs::write(dir.path().join("app.garbage.1.log.gz"), b"abc").unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let records = collect(&naming, dir.path(), now);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].age_secs, 60);
        assert_eq!(records[0].size_bytes, 3);
    }

    #[test]
    fn test_enforce_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let naming = Naming::new("app.log", None);
        for id in 0..4 {
            fs::write(dir.path().join(format!("app.{}.log.gz", id)), b"x").unwrap();
        }
        let policy = RetentionPolicy { max_backups: 2, ..Default::default() };
        let removed = enforce(&naming, dir.path(), &policy, Utc::now());
        assert_eq!(removed, 2);
        assert_eq!(collect(&naming, dir.path(), Utc::now()).len(), 2);
    }
}
