//! Error types for the delivery side of the outbox.

use peer_outbox::OutboxError;
use thiserror::Error;

/// Failure of a storage collaborator.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed header: {0}")]
    Malformed(String),

    #[error("Payload not found: {0}")]
    PayloadNotFound(String),
}

/// Failure of the crypto collaborator.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("No key material for {0}")]
    KeyUnavailable(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Errors surfaced by the delivery worker and the send service.
///
/// Per-item delivery failures are not errors: they are classified into a
/// `TransferResult` and resolved against the lease. These variants cover
/// misuse and failures outside a single delivery.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport setup failed: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        DeliveryError::Transport(e.to_string())
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
