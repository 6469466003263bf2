//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, stdout or rotating file)
//!     → metrics.rs (counters, histograms)
//!     → tracing.rs (spans around store round-trips)
//!
//! Consumers:
//!     → Log files under logfile/ rotation and retention
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all request logs
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod tracing;
