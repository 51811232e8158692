//! Durable, lease-based peer transfer outbox.
//!
//! This crate provides:
//! - OutboxQueue: per-tenant persisted queue of "deliver file F to recipient R"
//! - PendingTenantIndex: cross-tenant wake index the driver scans for work
//! - TransferHistory: latest per-recipient delivery status of each file
//! - Lease / PendingLease: single-use tokens over leased rows
//! - TransferResult: the failure taxonomy and its retry disposition
//!
//! Both the queue and the index are accessed only through pop, commit and
//! cancel/reschedule. A leased row is invisible to every other pop until
//! its lease is resolved or reclaimed after expiry.

mod clock;
mod error;
mod history;
mod ids;
mod item;
mod lease;
mod pending;
mod queue;
mod reclaim;
mod result;
mod serde_b64;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{OutboxError, OutboxResult};
pub use history::{RecipientTransferStatus, TransferHistory};
pub use ids::{BoxId, InternalDriveFileId, OutboxItemId, Recipient, TenantId};
pub use item::{
    AppNotificationOptions, Attempt, EncryptedClientAuthToken, EncryptedKeyHeader,
    EncryptedTransferInstructionSet, FileSystemType, NewOutboxItem, OutboxItem,
    RedactedAccessControlList, SecurityGroup, SendContents, TargetDrive, TransitOptions,
};
pub use lease::{Lease, LeaseId, LeaseResolution, PendingLease, PendingResolution, RescheduledItem};
pub use outbox_database::LeaseResolutionCounts;
pub use pending::{PendingTenantIndex, PendingTenantRecord};
pub use queue::{OutboxQueue, OutboxStatus};
pub use reclaim::{reclaim_expired_leases, ReclaimReport};
pub use result::{
    Disposition, LatestProblem, OutboxProcessingResult, PeerResponseCode, TransferResult,
    TransferStatus,
};
