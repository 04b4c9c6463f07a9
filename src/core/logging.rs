//! Structured logging system
//!
//! Sets up the global tracing subscriber for the binary. JSON or text
//! output goes to stdout or to a size-rotated log file. Module audit
//! entries are a separate concern, see `module::audit`.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Keeps the non-blocking writer alive for the lifetime of the process
pub struct Logger {
    _guard: WorkerGuard,
}

impl Logger {
    /// Initialize the logging system based on configuration
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => tracing_appender::non_blocking(io::stdout()),
            "file" => {
                let log_file = config.log_file.as_ref()
                    .context("log_file must be specified when output is 'file'")?;

                if let Some(parent) = log_file.parent() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create log directory")?;
                }

                let appender = create_rolling_appender(
                    log_file,
                    config.max_file_size,
                    config.max_backups,
                )?;
                tracing_appender::non_blocking(appender)
            }
            other => anyhow::bail!("Invalid output configuration: {}", other),
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .boxed(),
            other => anyhow::bail!("Invalid format configuration: {}", other),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::debug!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            "Logging system initialized"
        );

        Ok(Logger { _guard: guard })
    }
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {}", level),
    }
}

fn create_rolling_appender(
    log_file: &Path,
    max_file_size: usize,
    max_backups: usize,
) -> Result<RollingFileAppender> {
    let directory = log_file.parent()
        .context("Log file must have a parent directory")?;

    let filename = log_file.file_name()
        .context("Log file must have a filename")?
        .to_str()
        .context("Log filename must be valid UTF-8")?;

    Ok(RollingFileAppender::new(
        directory.to_path_buf(),
        filename.to_string(),
        max_file_size,
        max_backups,
    ))
}

/// File appender that rotates once the current file would exceed `max_file_size`
pub struct RollingFileAppender {
    directory: PathBuf,
    filename: String,
    max_file_size: usize,
    max_backups: usize,
    current_file: Mutex<Option<File>>,
    current_size: AtomicUsize,
}

impl RollingFileAppender {
    pub fn new(
        directory: PathBuf,
        filename: String,
        max_file_size: usize,
        max_backups: usize,
    ) -> Self {
        Self {
            directory,
            filename,
            max_file_size,
            max_backups,
            current_file: Mutex::new(None),
            current_size: AtomicUsize::new(0),
        }
    }

    fn current_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{}", self.filename, index))
    }

    fn lock_file(&self) -> io::Result<MutexGuard<'_, Option<File>>> {
        self.current_file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }

    /// Shift `name.N` to `name.N+1`, dropping the oldest, then move the live file to `name.1`
    fn rotate(&self) -> io::Result<()> {
        *self.lock_file()? = None;

        for i in (1..self.max_backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(i + 1))?;
            }
        }

        let current = self.current_path();
        if current.exists() {
            std::fs::rename(&current, self.backup_path(1))?;
        }

        self.current_size.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn open_file(&self) -> io::Result<MutexGuard<'_, Option<File>>> {
        let mut guard = self.lock_file()?;

        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.current_path())?;
            self.current_size
                .store(file.metadata()?.len() as usize, Ordering::SeqCst);
            *guard = Some(file);
        }

        Ok(guard)
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current_size = self.current_size.load(Ordering::SeqCst);
        if current_size > 0 && current_size + buf.len() > self.max_file_size {
            self.rotate()?;
        }

        let mut guard = self.open_file()?;
        let written = match guard.as_mut() {
            Some(file) => file.write(buf)?,
            None => return Err(io::Error::new(io::ErrorKind::Other, "log file not open")),
        };

        self.current_size.fetch_add(written, Ordering::SeqCst);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.lock_file()?.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_rolling_appender_paths() {
        let appender = RollingFileAppender::new(
            PathBuf::from("/tmp/logs"),
            "onyx.log".to_string(),
            1024,
            5,
        );

        assert_eq!(appender.current_path(), PathBuf::from("/tmp/logs/onyx.log"));
        assert_eq!(appender.backup_path(1), PathBuf::from("/tmp/logs/onyx.log.1"));
        assert_eq!(appender.backup_path(2), PathBuf::from("/tmp/logs/onyx.log.2"));
    }

    #[test]
    fn test_rolling_appender_rotates() {
        let dir = TempDir::new().unwrap();
        let mut appender = RollingFileAppender::new(
            dir.path().to_path_buf(),
            "onyx.log".to_string(),
            16,
            2,
        );

        appender.write_all(b"0123456789").unwrap();
        appender.write_all(b"abcdefghij").unwrap();
        appender.flush().unwrap();

        let rotated = std::fs::read_to_string(dir.path().join("onyx.log.1")).unwrap();
        let live = std::fs::read_to_string(dir.path().join("onyx.log")).unwrap();
        assert_eq!(rotated, "0123456789");
        assert_eq!(live, "abcdefghij");
    }
}
