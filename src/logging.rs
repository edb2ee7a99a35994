// src/logging.rs
//
// Timestamped stderr logging with an optional log file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::io::IoError;

/// Global log file handle. When `Some`, `tlog!` writes to both stderr and this file.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Name of the symlink pointing at the most recent log file
const LATEST_LOG_NAME: &str = "nearfield.log";

/// Start writing log output to a new timestamped file in `log_dir`.
///
/// Returns the path of the created file. On Unix a `nearfield.log` symlink in
/// the same directory is pointed at it.
pub fn init_file_logging(log_dir: &Path) -> Result<PathBuf, IoError> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        IoError::configuration(format!("failed to create log dir {}: {}", log_dir.display(), e))
    })?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-nearfield.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| IoError::configuration(format!("failed to create log file: {}", e)))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join(LATEST_LOG_NAME);
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            eprintln!(
                "{} [logging] Failed to create {} symlink: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                LATEST_LOG_NAME,
                e
            );
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would take the LOG_FILE lock, so write this one directly
    eprintln!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    );

    Ok(log_path)
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.take().is_some() {
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", msg);
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_writes_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_file_logging(dir.path()).unwrap();

        tlog!("[test] hello {}", 42);
        stop_file_logging();
        tlog!("[test] not in file");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[test] hello 42"));
        assert!(!contents.contains("not in file"));

        #[cfg(unix)]
        assert!(dir.path().join(LATEST_LOG_NAME).exists());
    }
}
