use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use aileron_gateway::cron::{CronJob, CronSchedule};

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[test]
fn next_skips_months_without_the_day() {
    let schedule = CronSchedule::parse("TZ=UTC 59 59 23 31 * *").unwrap();
    assert_eq!(schedule.next(utc(2000, 2, 10, 0, 0, 0)), Some(utc(2000, 3, 31, 23, 59, 59)));
}

#[test]
fn every_two_seconds_rolls_the_minute() {
    let schedule = CronSchedule::parse("CRON_TZ=UTC */2 * * * * *").unwrap();
    assert_eq!(schedule.next(utc(2000, 1, 1, 0, 0, 58)), Some(utc(2000, 1, 1, 0, 1, 0)));
}

#[test]
fn next_is_strictly_after_and_minimal() {
    let schedule = CronSchedule::parse("TZ=UTC 0 */15 9-17 * * MON-FRI").unwrap();
    let mut t = utc(2024, 3, 8, 16, 50, 0); // Friday
    let mut fires = Vec::new();
    for _ in 0..4 {
        let next = schedule.next(t).unwrap();
        assert!(next > t);
        fires.push(next);
        t = next;
    }
    assert_eq!(
        fires,
        vec![
            utc(2024, 3, 8, 17, 0, 0),
            utc(2024, 3, 8, 17, 15, 0),
            utc(2024, 3, 8, 17, 30, 0),
            utc(2024, 3, 8, 17, 45, 0),
        ]
    );
    // Weekend is skipped.
    assert_eq!(schedule.next(utc(2024, 3, 8, 17, 45, 0)), Some(utc(2024, 3, 11, 9, 0, 0)));
}

#[test]
fn impossible_dates_are_rejected() {
    assert!(CronSchedule::parse("* * 30 2 *").is_err());
    assert!(CronSchedule::parse("*/0 * * * *").is_err());
    assert!(CronSchedule::parse("TZ=Mars/Olympus * * * * *").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_callbacks_never_overlap() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let job = {
        let (active, peak, runs) = (active.clone(), peak.clone(), runs.clone());
        CronJob::new("* * * * * *", move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_secs(2));
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap()
    };

    job.start();
    tokio::time::sleep(Duration::from_millis(4500)).await;
    job.stop();

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(runs.load(Ordering::SeqCst) >= 1);
    assert!(runs.load(Ordering::SeqCst) <= 3);
}
