//! Size-based rotation for the daemon log files.
//!
//! `packsync.log` and `packsync-err.log` rotate at 10 MiB into numbered
//! copies (`packsync.log.1` newest … `packsync.log.5` oldest).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotation threshold (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept per log file.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if it has grown past `max_bytes`.
///
/// The oldest numbered copy is deleted, the rest shift up by one, the live
/// file becomes `.1`, and a fresh empty live file is created so the daemon
/// always has a writable path. Missing files are not an error.
///
/// Returns whether a rotation happened.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;

    let _ = fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;
    Ok(true)
}

/// Rotate both daemon log files under `home`. A failure on one file is
/// logged and does not block the other.
pub fn rotate_logs(home: &Path) {
    for log_path in [
        crate::paths::stdout_log_path(home),
        crate::paths::stderr_log_path(home),
    ] {
        match rotate_if_needed(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(crate::paths::DAEMON_STDOUT_LOG);
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn oversized(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![b'x'; MAX_LOG_BYTES as usize + 1]).unwrap();
        path
    }

    #[test]
    fn small_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("packsync.log");
        fs::write(&log, b"short").unwrap();

        assert!(!rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("packsync.log");
        assert!(!rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
    }

    #[test]
    fn oversized_file_rotates_and_live_log_is_reset() {
        let dir = TempDir::new().unwrap();
        let log = oversized(&dir, "packsync.log");

        assert!(rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert!(fs::metadata(numbered_path(&log, 1)).unwrap().len() > 0);
    }

    #[test]
    fn rotation_never_keeps_more_than_the_cap() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("packsync.log");
        for n in 1..=MAX_ROTATED_FILES {
            fs::write(numbered_path(&log, n), format!("copy-{n}")).unwrap();
        }
        oversized(&dir, "packsync.log");

        assert!(rotate_if_needed(&log, MAX_LOG_BYTES, MAX_ROTATED_FILES).unwrap());
        assert!(numbered_path(&log, MAX_ROTATED_FILES).exists());
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
        // The pre-rotation `.1` is now `.2`.
        assert_eq!(fs::read_to_string(numbered_path(&log, 2)).unwrap(), "copy-1");
    }
}
