//! Usage: Process-wide tracing setup (stderr + optional daily-rolling file, `log` bridge).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::infra::settings::{LogSettings, DEFAULT_LOG_LEVEL};
use crate::shared::error::{AppError, AppResult};

static INSTALLED: AtomicBool = AtomicBool::new(false);
// Flushes buffered file output on process exit.
static FILE_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Installs the global subscriber once. Returns `Ok(false)` if it was already installed.
pub fn init(settings: &LogSettings) -> AppResult<bool> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }
    match install(settings) {
        Ok(guard) => {
            if let Ok(mut slot) = FILE_GUARD.lock() {
                *slot = guard;
            }
            Ok(true)
        }
        Err(err) => {
            INSTALLED.store(false, Ordering::SeqCst);
            Err(err)
        }
    }
}

fn install(settings: &LogSettings) -> AppResult<Option<WorkerGuard>> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&settings.level, rust_log.as_deref());

    let (file_layer, guard) = match settings.dir.as_deref() {
        Some(dir) => {
            let (writer, guard) = file_writer(dir, &settings.file_prefix)?;
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::new("LOG_INIT", format!("failed to install subscriber: {e}")))?;

    if let Err(err) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge not installed: {err}");
    }

    tracing::info!(
        level = %settings.level,
        log_dir = ?settings.dir,
        "logging initialized"
    );
    Ok(guard)
}

fn file_writer(
    dir: &Path,
    prefix: &str,
) -> AppResult<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir).map_err(|e| {
        AppError::with_source(
            "LOG_INIT",
            format!("failed to create log dir {}", dir.display()),
            e,
        )
    })?;
    let appender = tracing_appender::rolling::daily(dir, prefix);
    Ok(tracing_appender::non_blocking(appender))
}

/// `RUST_LOG` wins when set and valid, then the configured level, then `info`.
fn build_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_new(level.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_prefers_rust_log() {
        let filter = build_filter("warn", Some("chat_stream_core=trace"));
        assert_eq!(filter.to_string(), "chat_stream_core=trace");
    }

    #[test]
    fn filter_falls_back_to_configured_level() {
        assert_eq!(build_filter("debug", None).to_string(), "debug");
        assert_eq!(build_filter("debug", Some("  ")).to_string(), "debug");
    }

    #[test]
    fn file_writer_creates_missing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("nested").join("logs");
        let (_writer, guard) = file_writer(&dir, "chat-stream").expect("writer");
        drop(guard);
        assert!(dir.is_dir());
    }

    #[test]
    fn init_is_idempotent() {
        let settings = LogSettings::default();
        let first = init(&settings).expect("init");
        let second = init(&settings).expect("init again");
        assert!(first);
        assert!(!second);
    }
}
