//! Errors raised while loading host configuration or secrets.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting is out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `config.json` could not be parsed.
    #[error("Malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot resolve host directory: {0}")]
    Path(String),

    /// The sealing key is unusable or a sealed blob failed to open.
    #[error("Sealing error: {0}")]
    Crypto(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
