//! # Observability
//!
//! Tracing setup for the peer outbox binaries.
//!
//! Services call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Events go to stderr, compact or JSON,
//! and optionally to a daily JSONL file under `log_dir` that can be tailed:
//!
//! ```text
//! tail -f ~/.peer-outbox/logs/peer-outbox-2026-10-16.jsonl | jq
//! ```
//!
//! `RUST_LOG` always wins over the configured default level.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "peer-outbox".into(),
//!     default_level: "debug".into(),
//!     ..Default::default()
//! });
//! tracing::info!("service started");
//! ```

mod file_sink;

pub use file_sink::DailyLogWriter;

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Output format of the stderr sink. The file sink is always JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, also used as the log file prefix.
    pub service_name: String,

    /// Filter directive used when `RUST_LOG` is unset.
    pub default_level: String,

    pub format: LogFormat,

    /// Directory for daily JSONL files. No file sink when `None`.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_dir: None,
        }
    }
}

/// Initialize logging with defaults and the given service name.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Install the global subscriber.
///
/// Calling this twice is harmless: the second call leaves the first
/// subscriber in place. A log directory that cannot be opened disables the
/// file sink and is reported on stderr once the subscriber is up.
pub fn init_with_config(config: LogConfig) {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stderr = fmt::layer().with_target(true).with_writer(io::stderr);
    match config.format {
        LogFormat::Compact => layers.push(stderr.compact().with_filter(filter()).boxed()),
        LogFormat::Json => layers.push(stderr.json().with_filter(filter()).boxed()),
    }

    let mut sink_error = None;
    if let Some(dir) = &config.log_dir {
        match DailyLogWriter::new(dir, &config.service_name) {
            Ok(writer) => layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_writer(writer)
                    .with_filter(filter())
                    .boxed(),
            ),
            Err(e) => sink_error = Some((dir.clone(), e)),
        }
    }

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        return;
    }

    match sink_error {
        Some((dir, e)) => tracing::warn!(
            log_dir = %dir.display(),
            error = %e,
            "Log file sink disabled"
        ),
        None => tracing::debug!(
            service = %config.service_name,
            log_dir = ?config.log_dir,
            "Observability initialized"
        ),
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn};

pub use tracing::Level;
