use std::fs;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber.
///
/// Events go to a daily-rolling file under `log_dir` and, optionally, to stdout.
/// The filter comes from `LOG_LEVEL` when it parses, otherwise `default_level`.
/// Keep the returned guard alive for the lifetime of the process or buffered
/// lines are lost on exit.
pub fn init_logging(
    log_dir: &str,
    log_file: &str,
    default_level: &str,
    log_to_stdout: bool,
) -> WorkerGuard {
    fs::create_dir_all(log_dir).ok();

    let file_appender = rolling::daily(log_dir, log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true)
        .with_thread_ids(true);

    let env_filter =
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    // try_init: a second call (tests, embedding hosts) keeps the first subscriber
    if log_to_stdout {
        registry.with(stdout_layer).try_init().ok();
    } else {
        registry.try_init().ok();
    }

    guard
}

/// Convenience wrapper reading every setting from [`crate::config::AppConfig`].
pub fn init_from_config() -> WorkerGuard {
    let cfg = crate::config::AppConfig::global().clone();
    init_logging(&cfg.log_dir, &cfg.log_file, &cfg.log_level, cfg.log_to_stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_to_a_rolling_file() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        let guard = init_logging(log_dir.to_str().unwrap(), "marker.log", "info", false);
        tracing::info!("logging initialised");
        drop(guard);

        let names: Vec<String> = fs::read_dir(&log_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("marker.log")), "{names:?}");
    }
}
