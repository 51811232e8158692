//! # Peer Transfer
//!
//! Delivery half of the peer outbox: everything between a leased batch and
//! a resolved lease, plus the producer fan-out that fills the queue.
//!
//! ## Collaborators
//!
//! The worker never touches drive storage, key material, permissions or
//! the network directly. Each is a trait:
//!
//! - [`DriveStorage`]: headers, payload and thumbnail streams, hard delete
//! - [`TransferCrypto`]: re-wraps key headers, seals and unseals client tokens
//! - [`AclAuthorizer`]: recipient permission against a file's ACL
//! - [`PeerTransport`]: sends a [`TransferBody`]; [`HttpPeerTransport`] is
//!   the multipart-over-HTTPS implementation
//!
//! ## Failure taxonomy
//!
//! | Outcome                                   | Result                                   | Lease      |
//! |-------------------------------------------|------------------------------------------|------------|
//! | 2xx with an accepted code                 | `Success`                                | commit     |
//! | 403                                       | `RecipientServerReturnedAccessDenied`    | commit     |
//! | 5xx                                       | `RecipientServerError`                   | reschedule |
//! | timeout, refused, canceled                | `RecipientServerNotResponding`           | reschedule |
//! | any other status                          | `UnknownError`                           | commit     |
//! | ACL no longer grants the recipient        | `RecipientDoesNotHavePermissionToFileAcl`| commit     |
//! | distribution switched off                 | `FileDoesNotAllowDistribution`           | commit     |

mod acl;
mod classify;
mod crypto;
mod drive;
mod error;
mod redact;
mod retry;
mod sender;
mod transport;
mod wire;
mod worker;

#[cfg(test)]
mod test_support;

pub use acl::{evaluate, AclAuthorizer, ConnectionAclAuthorizer, ConnectionDirectory, RecipientStanding};
pub use classify::{classify, Classification};
pub use crypto::{ClientAuthToken, TransferCrypto};
pub use drive::{
    AccessControlList, AppFileMetadata, ByteStream, DriveStorage, FileMetadata, FileState,
    GlobalTransitIdFileIdentifier, PayloadDescriptor, ServerFileHeader, ServerMetadata, ThumbnailDescriptor,
};
pub use error::{CryptoError, DeliveryError, DeliveryResult, StorageError};
pub use redact::RedactedFileMetadata;
pub use retry::{RetryPolicy, MAX_RETRY_DELAY};
pub use sender::{transfer_instructions, PeerTransferService};
pub use transport::{HttpPeerTransport, HttpTransportConfig, PeerTransport, TransmitOutcome};
pub use wire::{build_transfer_body, thumbnail_part_name, OutgoingPart, PartBody, PartKind, PeerTransferResponse, TransferBody};
pub use worker::{BatchReport, DeliveryEvent, DeliveryServices, DeliveryWorker, WorkerConfig};
