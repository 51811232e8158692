//! Logging initialization for the outbox host.
//!
//! Thin wrapper over the observability crate so every binary configures
//! tracing the same way.

pub use observability::{init_with_config, LogConfig, LogFormat};

/// Initialize logging for the outbox host.
///
/// `RUST_LOG` wins over `level`. Set `PEER_OUTBOX_LOG_FORMAT=json` for JSON
/// output on stderr. When `log_dir` is given, every event is also appended
/// as JSONL to a daily file there.
pub fn init_logging(level: &str, log_dir: Option<std::path::PathBuf>) {
    let format = match std::env::var("PEER_OUTBOX_LOG_FORMAT")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "json" => LogFormat::Json,
        _ => LogFormat::Compact,
    };

    observability::init_with_config(LogConfig {
        service_name: "peer-outbox".into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        format,
        log_dir,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
