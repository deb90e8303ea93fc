//! Logging setup for the command-line front-end.
//!
//! Console output goes to stderr so that stdout carries only command
//! results. When a log directory is configured, records are also written to
//! a daily-rotated file and files older than the retention period are
//! removed at startup.

use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_NAME: &str = "eiscp-remote.log";

/// Initialize console logging and, with `log_dir`, file logging.
///
/// The filter comes from `RUST_LOG` when set, then `level`, then `debug`
/// for `verbose` and `warn` otherwise. The returned guard flushes the file
/// writer when dropped and must be held until exit.
pub fn init_logging(
    log_dir: Option<&Path>,
    retention_days: u64,
    verbose: bool,
    level: Option<&str>,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let default_level = match level {
        Some(level) => level,
        None if verbose => "debug",
        None => "warn",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            clean_old_logs(dir, retention_days)?;

            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_timer(LocalTimeTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbose)
                .with_level(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_timer(LocalTimeTimer),
        )
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {}", e))?;

    // The library crates log through the `log` facade.
    tracing_log::LogTracer::init().map_err(|e| format!("Failed to initialize LogTracer: {}", e))?;

    Ok(guard)
}

/// Remove log files older than `retention_days`.
fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        let is_log_file = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.contains(LOG_FILE_NAME));
        if !is_log_file {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => chrono::DateTime::<Local>::from(modified),
            Err(_) => continue,
        };
        if modified < cutoff {
            if let Err(e) = fs::remove_file(&path) {
                eprintln!("Failed to remove old log file {:?}: {}", path, e);
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, SystemTime};

    fn write_aged(path: &Path, age_days: u64) {
        let modified = SystemTime::now() - Duration::from_secs(age_days * 24 * 60 * 60);
        fs::write(path, b"log").unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    #[test]
    fn test_clean_old_logs() {
        let dir = std::env::temp_dir().join(format!("eiscp-remote-logs-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let old_log = dir.join(format!("{}.old", LOG_FILE_NAME));
        let recent_log = dir.join(format!("{}.recent", LOG_FILE_NAME));
        let old_other = dir.join("notes.txt");
        write_aged(&old_log, 30);
        write_aged(&recent_log, 2);
        write_aged(&old_other, 30);

        clean_old_logs(&dir, 7).unwrap();
        assert!(!old_log.exists());
        assert!(recent_log.exists());
        assert!(old_other.exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_log_dir() {
        let dir = std::env::temp_dir().join("eiscp-remote-logs-missing");
        assert!(clean_old_logs(&dir, 7).is_ok());
    }
}
