//! Coalescing cron job runner.
//!
//! # Responsibilities
//! - Sleep until the next fire time, or until stopped
//! - Fire the callback on a blocking task with panics contained
//! - Drop ticks while a previous invocation is still running
//!
//! # Design Decisions
//! - Waits longer than an hour wake at 95% and recompute (coarse clocks drift)
//! - `stop` drops the stop sender; an in-flight callback runs to completion

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cron::clock::{Clock, SystemClock};
use crate::cron::expr::{CronError, CronSchedule};
use crate::observability::metrics;

const CALIBRATION_THRESHOLD: Duration = Duration::from_secs(60 * 60);

type Callback = Arc<dyn Fn() + Send + Sync>;

/// A schedule paired with a callback.
pub struct CronJob {
    schedule: Arc<CronSchedule>,
    callback: Callback,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl CronJob {
    /// Compile `expr` and bind it to `callback`.
    pub fn new<F>(expr: &str, callback: F) -> Result<Self, CronError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let schedule = CronSchedule::parse(expr)?;
        Ok(Self::with_schedule(schedule, callback))
    }

    pub fn with_schedule<F>(schedule: CronSchedule, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            schedule: Arc::new(schedule),
            callback: Arc::new(callback),
            clock: Arc::new(SystemClock),
            running: Arc::new(AtomicBool::new(false)),
            stop: Mutex::new(None),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// True while a callback invocation is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True between `start` and `stop`.
    pub fn is_started(&self) -> bool {
        self.stop.lock().is_some()
    }

    /// Spawn the ticker task. A second call while started is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut stop = self.stop.lock();
        if stop.is_some() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        *stop = Some(tx);

        let ticker = Ticker {
            schedule: self.schedule.clone(),
            callback: self.callback.clone(),
            clock: self.clock.clone(),
            running: self.running.clone(),
        };
        tokio::spawn(ticker.run(rx));
    }

    /// Stop taking new ticks. `start` may be called again afterwards.
    pub fn stop(&self) {
        self.stop.lock().take();
    }
}

impl Drop for CronJob {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Ticker {
    schedule: Arc<CronSchedule>,
    callback: Callback,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
}

impl Ticker {
    async fn run(self, mut stop: oneshot::Receiver<()>) {
        loop {
            let now = self.clock.now();
            let Some(next) = self.schedule.next(now) else {
                tracing::warn!("Cron schedule has no further fire times, stopping job");
                return;
            };
            let (wait, fire) = plan_wait(now, next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut stop => {
                    tracing::debug!("Cron job stopped");
                    return;
                }
            }

            if fire {
                self.fire();
            }
        }
    }

    fn fire(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Previous cron run still in flight, skipping tick");
            metrics::record_cron_run("skipped");
            return;
        }

        let callback = self.callback.clone();
        let running = self.running.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback()));
            running.store(false, Ordering::Release);
            match outcome {
                Ok(()) => metrics::record_cron_run("ok"),
                Err(payload) => {
                    tracing::error!(panic = %panic_message(&*payload), "Cron job panicked");
                    metrics::record_cron_run("panic");
                }
            }
        });
    }
}

/// How long to sleep before `next`, and whether the wake-up is the fire time
/// (`true`) or an intermediate calibration point (`false`).
pub(crate) fn plan_wait(now: DateTime<Utc>, next: DateTime<Utc>) -> (Duration, bool) {
    let wait = (next - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(Duration::from_nanos(1));
    if wait > CALIBRATION_THRESHOLD {
        (wait.mul_f64(0.95), false)
    } else {
        (wait, true)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
