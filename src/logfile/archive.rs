//! Moving rotated segments into the destination directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::logfile::naming::{Naming, GZIP_SUFFIX};
use crate::logfile::{retry_once, LogFileError};

/// Gzip levels accepted by the archiver. Zero disables compression.
pub const MIN_LEVEL: u32 = 1;
pub const MAX_LEVEL: u32 = 9;

/// Compress (or move) every rotated, not yet archived segment in `src`.
///
/// Returns the first error but keeps processing the remaining files.
pub fn archive_rotated(naming: &Naming, src: &Path, dst: &Path, level: u32) -> Result<(), LogFileError> {
    let entries = fs::read_dir(src).map_err(|e| LogFileError::io("read_dir", src, e))?;
    let mut first_error = None;

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        match naming.parse(name) {
            Some(parsed) if !parsed.gzipped => {}
            _ => continue,
        }

        let from = src.join(name);
        let result = if level == 0 {
            if src == dst {
                Ok(())
            } else {
                let to = dst.join(name);
                retry_once(|| fs::rename(&from, &to)).map_err(|e| LogFileError::io("rename", &from, e))
            }
        } else {
            let to = dst.join(format!("{}{}", name, GZIP_SUFFIX));
            gzip_file(&from, &to, level)
        };

        if let Err(e) = result {
            tracing::error!(file = %from.display(), error = %e, "Failed to archive rotated log file");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Stream `from` through gzip into `to`. Removes `from` on success and the
/// partial `to` on failure.
pub fn gzip_file(from: &Path, to: &Path, level: u32) -> Result<(), LogFileError> {
    let level = level.clamp(MIN_LEVEL, MAX_LEVEL);
    let input = retry_once(|| File::open(from)).map_err(|e| LogFileError::io("open", from, e))?;
    let output = retry_once(|| {
        OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(to)
    })
    .map_err(|e| LogFileError::io("open", to, e))?;

    let copied = (|| -> io::Result<()> {
        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::new(level));
        io::copy(&mut BufReader::new(input), &mut encoder)?;
        encoder.finish()?.flush()
    })();

    match copied {
        Ok(()) => retry_once(|| fs::remove_file(from)).map_err(|e| LogFileError::io("remove", from, e)),
        Err(e) => {
            let _ = fs::remove_file(to);
            Err(LogFileError::io("compress", from, e))
        }
    }
}
