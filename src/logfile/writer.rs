//! Rotating logical-file writer.
//!
//! # Responsibilities
//! - Present one writable file whose backing file is swapped at a size threshold
//! - Rename retired segments to `<base>[.<timestamp>].<id><ext>`
//! - Hand archive compression and retention to a background worker
//!
//! # Design Decisions
//! - Writers share a read lock on the active handle; swap and close take the write lock
//! - `swapping` is claimed by CAS so at most one swap runs at a time
//! - Nothing logs while the handle lock is held: this writer is usually the log sink
//! - Failing to reopen after a swap falls back to stderr and interrupts the process

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::config::LogFileConfig;
use crate::cron::Zone;
use crate::lifecycle::signals;
use crate::logfile::naming::{Naming, TimeLayout};
use crate::logfile::retention::{self, RetentionPolicy};
use crate::logfile::{archive, retry_once, LogFileError};
use crate::observability::metrics;

/// Probe file written and removed in each directory at construction.
pub const PERMISSION_PROBE: &str = "permission-check.txt";

const TASK_QUEUE_CAPACITY: usize = 64;

/// Construction parameters for [`RotatingFile`].
#[derive(Debug, Clone)]
pub struct RotatingFileOptions {
    pub file_name: String,
    pub src_dir: PathBuf,
    /// Defaults to `src_dir`.
    pub dst_dir: Option<PathBuf>,
    /// Bytes written before a swap is triggered. Zero disables size rotation.
    pub rotate_size: u64,
    /// Gzip level for archives. Zero keeps archives uncompressed.
    pub compress_level: u32,
    pub time_layout: Option<String>,
    pub time_zone: Option<String>,
    pub retention: RetentionPolicy,
}

impl RotatingFileOptions {
    pub fn from_config(config: &LogFileConfig) -> Self {
        const MIB: u64 = 1024 * 1024;
        Self {
            file_name: config.file_name.clone(),
            src_dir: PathBuf::from(&config.src_dir),
            dst_dir: config.dst_dir.as_ref().map(PathBuf::from),
            rotate_size: config.rotate_size_mib.saturating_mul(MIB),
            compress_level: config.compress_level,
            time_layout: config.time_layout.clone(),
            time_zone: config.time_zone.clone(),
            retention: RetentionPolicy {
                max_backups: config.max_backup,
                max_age_secs: config.max_age_seconds,
                max_total_bytes: config.max_total_size_mib.saturating_mul(MIB),
            },
        }
    }
}

enum ActiveHandle {
    File(File),
    Stderr,
}

enum Task {
    Swap,
    Archive,
    /// Replies `true` when nothing else is queued or in progress.
    Barrier(Sender<bool>),
}

struct Shared {
    naming: Naming,
    src_dir: PathBuf,
    dst_dir: PathBuf,
    rotate_size: u64,
    level: u32,
    retention: RetentionPolicy,
    active: RwLock<ActiveHandle>,
    cur_size: AtomicU64,
    swapping: AtomicBool,
    tasks: Mutex<Option<Sender<Task>>>,
}

/// What happened under the handle lock, reported once the lock is released.
#[derive(Default)]
struct SwapOutcome {
    rotated: Option<Result<PathBuf, LogFileError>>,
    close_error: Option<io::Error>,
    reopen_error: Option<io::Error>,
}

/// A file that rotates itself. Implements [`Write`] for `&RotatingFile`, so an
/// `Arc<RotatingFile>` can be handed to `tracing_subscriber` as a writer.
pub struct RotatingFile {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RotatingFile {
    /// Create both directories, verify they are writable and open (or append
    /// to) the active file.
    pub fn new(options: RotatingFileOptions) -> Result<Self, LogFileError> {
        if options.file_name.is_empty() {
            return Err(LogFileError::Config("file name must not be empty".into()));
        }
        let layout = match options.time_layout.as_deref().filter(|l| !l.is_empty()) {
            Some(layout) => {
                let zone = Zone::parse(options.time_zone.as_deref().unwrap_or_default())
                    .map_err(LogFileError::Config)?;
                Some(TimeLayout::new(layout, zone))
            }
            None => None,
        };
        let naming = Naming::new(&options.file_name, layout);
        let src_dir = options.src_dir;
        let dst_dir = options.dst_dir.unwrap_or_else(|| src_dir.clone());

        for dir in [&src_dir, &dst_dir] {
            fs::create_dir_all(dir).map_err(|e| LogFileError::io("mkdir", dir, e))?;
            permission_check(dir)?;
        }

        let active_path = src_dir.join(naming.active_name());
        let (file, size) = open_append(&active_path).map_err(|e| LogFileError::io("open", &active_path, e))?;

        let (tx, rx) = crossbeam_channel::bounded(TASK_QUEUE_CAPACITY);
        let shared = Arc::new(Shared {
            naming,
            src_dir,
            dst_dir,
            rotate_size: options.rotate_size,
            level: options.compress_level,
            retention: options.retention,
            active: RwLock::new(ActiveHandle::File(file)),
            cur_size: AtomicU64::new(size),
            swapping: AtomicBool::new(false),
            tasks: Mutex::new(Some(tx)),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("logfile-archiver".into())
            .spawn(move || worker_shared.run_worker(rx))
            .map_err(|e| LogFileError::io("spawn", &active_path, e))?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Path of the file currently receiving writes.
    pub fn active_path(&self) -> PathBuf {
        self.shared.active_path()
    }

    /// Bytes written to the active file so far.
    pub fn current_size(&self) -> u64 {
        self.shared.cur_size.load(Ordering::Acquire)
    }

    /// Rotate now, on the calling thread. Returns immediately when another
    /// swap is already under way.
    pub fn swap_file(&self) {
        if !self.shared.try_claim_swap() {
            tracing::debug!("Log swap already in progress");
            return;
        }
        self.shared.swap();
    }

    /// Block until queued swaps, archives and retention passes have finished.
    pub fn drain(&self) {
        loop {
            let Some(tx) = self.shared.sender() else {
                return;
            };
            let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
            if tx.send(Task::Barrier(reply_tx)).is_err() {
                return;
            }
            match reply_rx.recv() {
                Ok(true) | Err(_) => return,
                Ok(false) => continue,
            }
        }
    }

    /// Retire the active file and archive it synchronously. Retention is not
    /// run so a partially filled segment never decides what gets evicted.
    /// Later writes go to stderr.
    pub fn close(&self) -> Result<(), LogFileError> {
        // Let the worker finish what it has, then stop it.
        drop(self.shared.tasks.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }

        {
            let mut active = self.shared.active.write();
            if let ActiveHandle::File(file) = std::mem::replace(&mut *active, ActiveHandle::Stderr) {
                let path = self.shared.active_path();
                file.sync_all().map_err(|e| LogFileError::io("close", &path, e))?;
                drop(file);
                self.shared.rename_active()?;
            }
            self.shared.cur_size.store(0, Ordering::Release);
        }

        archive::archive_rotated(
            &self.shared.naming,
            &self.shared.src_dir,
            &self.shared.dst_dir,
            self.shared.level,
        )
    }
}

impl Drop for RotatingFile {
    fn drop(&mut self) {
        // Closing the queue lets the worker exit once it is idle.
        drop(self.shared.tasks.lock().take());
    }
}

impl Write for &RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &*self.shared.active.read() {
            ActiveHandle::File(file) => {
                let mut file: &File = file;
                file.flush()
            }
            ActiveHandle::Stderr => io::stderr().flush(),
        }
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

impl Shared {
    fn active_path(&self) -> PathBuf {
        self.src_dir.join(self.naming.active_name())
    }

    fn sender(&self) -> Option<Sender<Task>> {
        self.tasks.lock().clone()
    }

    fn dispatch(&self, task: Task) -> bool {
        match self.sender() {
            Some(tx) => tx.try_send(task).is_ok(),
            None => false,
        }
    }

    fn try_claim_swap(&self) -> bool {
        self.swapping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let n = match &*self.active.read() {
            ActiveHandle::File(file) => {
                let mut file: &File = file;
                file.write(buf)?
            }
            ActiveHandle::Stderr => io::stderr().write(buf)?,
        };

        let total = self.cur_size.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
        if self.rotate_size > 0 && total >= self.rotate_size && self.try_claim_swap() && !self.dispatch(Task::Swap) {
            self.swapping.store(false, Ordering::Release);
        }
        Ok(n)
    }

    fn run_worker(&self, rx: Receiver<Task>) {
        for task in rx.iter() {
            match task {
                Task::Swap => self.swap(),
                Task::Archive => self.archive(),
                Task::Barrier(reply) => {
                    let idle = rx.is_empty() && !self.swapping.load(Ordering::Acquire);
                    let _ = reply.send(idle);
                }
            }
        }
    }

    /// Rotate the active file. The caller must have claimed `swapping`.
    fn swap(&self) {
        let outcome = self.rotate_locked();
        self.swapping.store(false, Ordering::Release);

        if let Some(e) = outcome.close_error {
            tracing::error!(file = %self.active_path().display(), error = %e, "Failed to close log file before rotation");
        }
        match outcome.rotated {
            Some(Ok(rotated)) => {
                metrics::record_log_rotation();
                tracing::info!(file = %rotated.display(), "Rotated log file");
                if !self.dispatch(Task::Archive) {
                    tracing::warn!("Log archive queue unavailable, archiving deferred to next rotation");
                }
            }
            Some(Err(e)) => tracing::error!(error = %e, "Failed to rename rotated log file"),
            None => {}
        }
        if let Some(e) = outcome.reopen_error {
            tracing::error!(
                file = %self.active_path().display(),
                error = %e,
                "Cannot reopen log file, writing to stderr and shutting down"
            );
            signals::interrupt_self();
        }
    }

    fn rotate_locked(&self) -> SwapOutcome {
        let mut outcome = SwapOutcome::default();
        let mut active = self.active.write();

        if let ActiveHandle::File(file) = std::mem::replace(&mut *active, ActiveHandle::Stderr) {
            let synced = file.sync_all();
            drop(file);
            match synced {
                Ok(()) => outcome.rotated = Some(self.rename_active()),
                Err(e) => outcome.close_error = Some(e),
            }
        }

        self.cur_size.store(0, Ordering::Release);
        match open_append(&self.active_path()) {
            Ok((file, size)) => {
                *active = ActiveHandle::File(file);
                self.cur_size.store(size, Ordering::Release);
            }
            Err(e) => outcome.reopen_error = Some(e),
        }
        outcome
    }

    fn rename_active(&self) -> Result<PathBuf, LogFileError> {
        let timestamp = self.naming.timestamp(Utc::now());
        let id = self
            .naming
            .next_id(timestamp.as_deref(), &[&self.src_dir, &self.dst_dir]);
        let from = self.active_path();
        let to = self
            .src_dir
            .join(self.naming.rotated_name(timestamp.as_deref(), id));
        retry_once(|| fs::rename(&from, &to)).map_err(|e| LogFileError::io("rename", &from, e))?;
        Ok(to)
    }

    fn archive(&self) {
        // Per-file failures are logged by the archiver.
        let _ = archive::archive_rotated(&self.naming, &self.src_dir, &self.dst_dir, self.level);
        retention::enforce(&self.naming, &self.dst_dir, &self.retention, Utc::now());
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = retry_once(|| options.open(path))?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

fn permission_check(dir: &Path) -> Result<(), LogFileError> {
    let probe = dir.join(PERMISSION_PROBE);
    fs::write(&probe, b"permission check").map_err(|e| LogFileError::io("write", &probe, e))?;
    fs::read(&probe).map_err(|e| LogFileError::io("read", &probe, e))?;
    fs::remove_file(&probe).map_err(|e| LogFileError::io("remove", &probe, e))
}
