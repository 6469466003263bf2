//! Rotating log files.
//!
//! # Responsibilities
//! - Keep one logical file open for writing, swapping it out at a size threshold
//!   or on a cron schedule
//! - Gzip rotated segments into a destination directory
//! - Evict old archives by count, age and total size
//!
//! # Layout
//! ```text
//! <src_dir>/<base><ext>                          active file
//! <src_dir>/<base>[.<ts>].<id><ext>              rotated, awaiting archive
//! <dst_dir>/<base>[.<ts>].<id><ext>[.gz]         archived
//! ```

pub mod archive;
pub mod naming;
pub mod retention;
pub mod writer;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::cron::{CronError, CronJob};

pub use naming::{Naming, TimeLayout};
pub use retention::RetentionPolicy;
pub use writer::{RotatingFile, RotatingFileOptions};

#[derive(Debug, Error)]
pub enum LogFileError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log file configuration: {0}")]
    Config(String),
}

impl LogFileError {
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Run a filesystem operation, retrying once on failure.
pub(crate) fn retry_once<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    op().or_else(|_| op())
}

/// A cron job that swaps `file` on every tick of `expr`.
pub fn rotation_job(expr: &str, file: Arc<RotatingFile>) -> Result<CronJob, CronError> {
    CronJob::new(expr, move || file.swap_file())
}
