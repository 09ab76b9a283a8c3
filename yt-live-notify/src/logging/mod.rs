//! Logging setup.
//!
//! Console output always; optional daily-rotated log files written through a
//! non-blocking appender. Timestamps use the local timezone.

use std::path::Path;

use chrono::{Local, Utc};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LoggingSettings;
use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "yt_live_notify=info,reqwest=warn";

/// Log file name prefix; the appender adds `.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "yt-live-notify.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Custom timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Initialize the global subscriber.
///
/// `verbosity_override` (from CLI flags) wins over both `RUST_LOG` and the
/// configured filter. Returns the file appender guard when file logging is
/// enabled; keep it alive for the lifetime of the process.
pub fn init_logging(
    settings: &LoggingSettings,
    log_dir: &Path,
    verbosity_override: Option<&str>,
) -> crate::Result<Option<WorkerGuard>> {
    let filter = match verbosity_override {
        Some(directive) => EnvFilter::try_new(directive),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&settings.filter)),
    }
    .map_err(|e| crate::Error::config(format!("Invalid log filter directive: {}", e)))?;

    let console = fmt::layer().with_ansi(true).with_timer(LocalTimer);

    if !settings.file_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()
            .map_err(|e| {
                crate::Error::config(format!("Failed to set global default subscriber: {}", e))
            })?;
        return Ok(None);
    }

    fs::ensure_dir_all_sync_with_op("creating log directory", log_dir)?;
    cleanup_old_logs(log_dir, LOG_RETENTION_DAYS);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::config(format!("Failed to set global default subscriber: {}", e))
        })?;

    Ok(Some(guard))
}

/// Delete rotated log files older than `retention_days`.
fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> usize {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %log_dir.display(), error = %e, "Failed to read log directory");
            return 0;
        }
    };

    let mut deleted_count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(LOG_FILE_PREFIX))
            .and_then(|suffix| suffix.strip_prefix('.'))
            .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if date < cutoff {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }
    deleted_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("yt_live_notify=info"));
    }

    #[test]
    fn test_cleanup_old_logs_keeps_recent_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let old = format!("{LOG_FILE_PREFIX}.2000-01-01");
        let recent = format!("{LOG_FILE_PREFIX}.{today}");

        std::fs::write(dir.path().join(&old), "old").unwrap();
        std::fs::write(dir.path().join(&recent), "new").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS), 1);
        assert!(!dir.path().join(&old).exists());
        assert!(dir.path().join(&recent).exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
