//! Cron scheduling subsystem.
//!
//! # Data Flow
//! ```text
//! expression string
//!     → expr.rs (tokenize, aliases, zone, six bitmasks)
//!     → CronSchedule::next(now) (pure, wall-clock search)
//!     → job.rs (ticker task: sleep until next, fire callback)
//!     → callback on a blocking task, panics contained
//! ```
//!
//! # Design Decisions
//! - Every field compiles to a 64-bit mask; bit i set iff value i is allowed
//! - Schedules that cannot fire within ten years are rejected at parse time
//! - At most one callback invocation per job is in flight; overlapping ticks are dropped
//! - The ticker reads time through `Clock` so tests can pin "now"

pub mod clock;
pub mod expr;
pub mod job;
pub mod zone;

pub use clock::{Clock, SystemClock};
pub use expr::{CronError, CronSchedule};
pub use job::CronJob;
pub use zone::Zone;
