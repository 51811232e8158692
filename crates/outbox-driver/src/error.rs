//! Driver error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Outbox error: {0}")]
    Outbox(#[from] peer_outbox::OutboxError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] peer_transfer::DeliveryError),

    /// A tenant's collaborators could not be assembled.
    #[error("Tenant registry error: {0}")]
    Registry(String),
}

/// Result type alias using DriverError.
pub type DriverResult<T> = Result<T, DriverError>;
