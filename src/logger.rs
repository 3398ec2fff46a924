//! Session logger — routes the `log` facade into a single session file.
//!
//! The file is **truncated (overwritten) at each `init`**, so it only ever
//! contains output from the most-recent session.
//!
//! Library code logs through `log::debug!` / `log::warn!` and never touches
//! this module; a host that wants the output on disk calls [`init`] once.
//! Panics are mirrored into the file before the previous hook runs.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Mutex<File>,
    path: PathBuf,
    level: LevelFilter,
}

impl SessionLogger {
    fn write_line(&self, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.write_line(&format!(
            "[{}] [{}] {}: {}",
            timestamp(),
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Returns the path of the current session log file.
pub fn log_path() -> Option<&'static Path> {
    LOGGER.get().map(|l| l.path.as_path())
}

/// Initialise the session logger at `path` with the given level.
///
/// * Creates the parent directory and creates (or truncates) the file.
/// * Registers the logger with the `log` facade.
/// * Installs a panic hook that writes the panic to the file.
///
/// Only the first successful call takes effect; later calls return
/// `AlreadyExists`.
pub fn init<P: AsRef<Path>>(path: P, level: LevelFilter) -> io::Result<()> {
    let path = path.as_ref().to_path_buf();
    if LOGGER.get().is_some() {
        return Err(io::Error::new(io::ErrorKind::AlreadyExists, "session logger already initialised"));
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    // Open file, truncating any previous session's content
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;

    let logger = SessionLogger { file: Mutex::new(file), path: path.clone(), level };
    if LOGGER.set(logger).is_err() {
        return Err(io::Error::new(io::ErrorKind::AlreadyExists, "session logger already initialised"));
    }
    let Some(logger) = LOGGER.get() else {
        return Ok(());
    };

    logger.write_line(&format!("=== terrastream session started {} ===", human_timestamp()));
    logger.write_line(&format!("Log file: {}", path.display()));
    logger.write_line("");

    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    } else {
        logger.write_line("another logger is registered; only panics are recorded here");
    }

    // Mirror panic info to the log, then run the default handler
    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(logger) = LOGGER.get() {
            logger.write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
            logger.flush();
        }
        prev(info);
    }));
    Ok(())
}

/// HH:MM:SS within the current UTC day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format_clock(d.as_secs()),
        Err(_) => "??:??:??".to_string(),
    }
}

fn format_clock(secs: u64) -> String {
    let h = (secs % 86400) / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

fn human_timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("(unix {})", d.as_secs()),
        Err(_) => "(unknown time)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_wraps_at_midnight() {
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(3661), "01:01:01");
        assert_eq!(format_clock(86400 + 59), "00:00:59");
    }

    #[test]
    fn session_file_is_truncated_and_records_log_lines() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("logs").join("session.log");
        fs::create_dir_all(dir.path().join("logs"))?;
        fs::write(&path, "stale output from an earlier run\n")?;

        init(&path, LevelFilter::Debug)?;
        assert_eq!(log_path(), Some(path.as_path()));
        log::warn!("tile {} failed", 7);
        log::logger().flush();

        let text = fs::read_to_string(&path)?;
        assert!(!text.contains("stale output"));
        assert!(text.starts_with("=== terrastream session started"));
        assert!(text.contains("[WARN]") && text.contains("tile 7 failed"));
        assert!(init(&path, LevelFilter::Debug).is_err());
        Ok(())
    }
}
