use std::io::IsTerminal;

use serde::{Deserialize, Serialize};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Default log level when neither config nor `RUST_LOG` set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Keeps the logging subscriber installed; dropping it ends logging.
pub struct LoggingGuard {
    _guard: DefaultGuard,
}

/// Installs the subscriber for the current thread and returns its guard.
///
/// `RUST_LOG` takes precedence over `level`. Output goes to stderr.
pub fn init(level: &str, format: LogFormat) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let guard = match format {
        LogFormat::Json => tracing::subscriber::set_default(
            Registry::default()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_default(
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(std::io::stderr().is_terminal())
                        .with_writer(std::io::stderr),
                ),
        ),
    };
    LoggingGuard { _guard: guard }
}
