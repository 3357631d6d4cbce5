use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt, Tee, WithMaxLevel, WithMinLevel};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOG_INIT: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Logging options. `RUST_LOG` overrides `base_level` when set.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub base_level: String,
    /// Directory for daily-rolling log files. Console only when `None`.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: "info".to_string(),
            log_dir: None,
            file_prefix: "conduit".to_string(),
            max_log_files: 5,
        }
    }
}

impl LogConfig {
    pub fn with_level(base_level: &str) -> Self {
        Self {
            base_level: base_level.to_string(),
            ..Self::default()
        }
    }
}

/// Installs the global subscriber. Only the first call has an effect, later
/// calls (parallel tests, repeated demo setup) are ignored.
pub fn setup_logging(config: &LogConfig) {
    LOG_INIT.get_or_init(|| init(config));
}

fn init(config: &LogConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.base_level))
        .unwrap_or_else(|e| panic!("Invalid log filter: {}", e));

    let console_writer = split_by_level(std::io::stdout, std::io::stderr);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_thread_names(true)
        .with_ansi(true)
        .with_writer(console_writer);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .unwrap_or_else(|e| panic!("Failed to create logs directory: {}", e));

            let file_appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .max_log_files(config.max_log_files)
                .build(dir)
                .unwrap_or_else(|e| panic!("Failed to create log file appender: {}", e));

            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_writer(file_writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A subscriber installed by someone else (e.g. a host application) wins.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// Routes INFO and more verbose events to `out`, WARN and ERROR to `err`.
fn split_by_level<O, E>(out: O, err: E) -> Tee<WithMinLevel<O>, WithMaxLevel<E>>
where
    O: for<'a> MakeWriter<'a>,
    E: for<'a> MakeWriter<'a>,
{
    out.with_min_level(Level::INFO)
        .and(err.with_max_level(Level::WARN))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn warnings_and_errors_go_to_stderr_only() {
        let (out, err) = (Captured::default(), Captured::default());
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_ansi(false)
            .with_writer(split_by_level(out.clone(), err.clone()))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("debug-line");
            tracing::info!("info-line");
            tracing::warn!("warn-line");
            tracing::error!("error-line");
        });

        let (out, err) = (out.text(), err.text());
        assert!(out.contains("debug-line") && out.contains("info-line"));
        assert!(!out.contains("warn-line") && !out.contains("error-line"));
        assert!(err.contains("warn-line") && err.contains("error-line"));
        assert!(!err.contains("debug-line") && !err.contains("info-line"));
    }

    #[test]
    fn repeated_setup_is_ignored() {
        setup_logging(&LogConfig::with_level("debug"));
        setup_logging(&LogConfig::with_level("trace"));
        tracing::debug!("logging initialized twice without panicking");
    }

    #[test]
    fn default_config_is_console_only() {
        let config = LogConfig::default();
        assert_eq!(config.base_level, "info");
        assert!(config.log_dir.is_none());
        assert_eq!(config.file_prefix, "conduit");
    }
}
