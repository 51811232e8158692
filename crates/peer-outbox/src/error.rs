//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] outbox_database::DatabaseError),

    /// JSON error in a typed column
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Identifier failed validation
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Caller passed an argument no queue operation accepts
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The lease no longer holds its rows: it was already resolved or
    /// reclaimed after expiry.
    #[error("Lease {lease_id} no longer holds its {expected} row(s)")]
    LeaseNotHeld { lease_id: String, expected: usize },

    /// A resolution named an item the lease does not cover.
    #[error("Item {item} is not covered by lease {lease_id}")]
    LeaseMismatch { lease_id: String, item: i64 },

    /// A stored row could not be decoded back into an item.
    #[error("Corrupt outbox row {row_id}: {reason}")]
    CorruptRow { row_id: i64, reason: String },
}

impl OutboxError {
    /// Lease misuse indicates a broken invariant, not a transient condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::LeaseNotHeld { .. } | Self::LeaseMismatch { .. } | Self::InvalidArgument(_)
        )
    }
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
