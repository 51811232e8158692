//! Delivery outcomes.
//!
//! [`TransferResult::disposition`] is the only place that decides whether a
//! classified outcome is retried.

use crate::ids::{InternalDriveFileId, OutboxItemId, Recipient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured response code returned by a recipient host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerResponseCode {
    /// Written straight to the target drive.
    AcceptedDirectWrite,
    /// Enqueued into the recipient's inbox for async processing.
    AcceptedIntoInbox,
    Rejected,
    AccessDenied,
    QuarantinedPayload,
    QuarantinedSenderNotConnected,
    #[serde(other)]
    Unknown,
}

impl PeerResponseCode {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::AcceptedDirectWrite | Self::AcceptedIntoInbox)
    }
}

/// Classified outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferResult {
    Success,
    RecipientServerReturnedAccessDenied,
    RecipientServerError,
    RecipientServerNotResponding,
    UnknownError,
    RecipientDoesNotHavePermissionToFileAcl,
    FileDoesNotAllowDistribution,
    /// The source header was gone when the worker re-read it.
    SourceFileMissing,
    /// Storage or crypto failed on this host while preparing the send.
    LocalTransientFailure,
}

/// How a lease row is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the row: delivered, or failed for good.
    Commit,
    /// Return the row to the queue after a backoff.
    Reschedule,
}

impl TransferResult {
    pub fn disposition(self) -> Disposition {
        match self {
            Self::RecipientServerError
            | Self::RecipientServerNotResponding
            | Self::LocalTransientFailure => Disposition::Reschedule,
            Self::Success
            | Self::RecipientServerReturnedAccessDenied
            | Self::UnknownError
            | Self::RecipientDoesNotHavePermissionToFileAcl
            | Self::FileDoesNotAllowDistribution
            | Self::SourceFileMissing => Disposition::Commit,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RecipientServerReturnedAccessDenied => "recipientServerReturnedAccessDenied",
            Self::RecipientServerError => "recipientServerError",
            Self::RecipientServerNotResponding => "recipientServerNotResponding",
            Self::UnknownError => "unknownError",
            Self::RecipientDoesNotHavePermissionToFileAcl => "recipientDoesNotHavePermissionToFileAcl",
            Self::FileDoesNotAllowDistribution => "fileDoesNotAllowDistribution",
            Self::SourceFileMissing => "sourceFileMissing",
            Self::LocalTransientFailure => "localTransientFailure",
        }
    }
}

impl std::fmt::Display for TransferResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one attempt, before lease resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxProcessingResult {
    pub item: OutboxItemId,
    pub file: InternalDriveFileId,
    pub recipient: Recipient,
    pub http_status: Option<u16>,
    pub response_code: Option<PeerResponseCode>,
    pub result: TransferResult,
    /// Version of the header that was sent, when one was read.
    pub version_tag: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Per-recipient status a caller sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    Enqueued,
    Delivered,
    DeliveredToInbox,
    PendingRetry,
    RecipientDoesNotHavePermissionToFileAcl,
    FileDoesNotAllowDistribution,
    RecipientReturnedAccessDenied,
    SourceFileMissing,
    UnknownError,
    /// No key material could be produced for the recipient; nothing was queued.
    EncryptionKeyUnavailable,
}

impl TransferStatus {
    pub fn from_result(result: TransferResult, code: Option<PeerResponseCode>) -> Self {
        match result {
            TransferResult::Success => match code {
                Some(PeerResponseCode::AcceptedDirectWrite) => Self::Delivered,
                _ => Self::DeliveredToInbox,
            },
            TransferResult::RecipientServerError
            | TransferResult::RecipientServerNotResponding
            | TransferResult::LocalTransientFailure => Self::PendingRetry,
            TransferResult::RecipientServerReturnedAccessDenied => Self::RecipientReturnedAccessDenied,
            TransferResult::RecipientDoesNotHavePermissionToFileAcl => {
                Self::RecipientDoesNotHavePermissionToFileAcl
            }
            TransferResult::FileDoesNotAllowDistribution => Self::FileDoesNotAllowDistribution,
            TransferResult::SourceFileMissing => Self::SourceFileMissing,
            TransferResult::UnknownError => Self::UnknownError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Delivered => "delivered",
            Self::DeliveredToInbox => "deliveredToInbox",
            Self::PendingRetry => "pendingRetry",
            Self::RecipientDoesNotHavePermissionToFileAcl => "recipientDoesNotHavePermissionToFileAcl",
            Self::FileDoesNotAllowDistribution => "fileDoesNotAllowDistribution",
            Self::RecipientReturnedAccessDenied => "recipientReturnedAccessDenied",
            Self::SourceFileMissing => "sourceFileMissing",
            Self::UnknownError => "unknownError",
            Self::EncryptionKeyUnavailable => "encryptionKeyUnavailable",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            "deliveredToInbox" => Self::DeliveredToInbox,
            "pendingRetry" => Self::PendingRetry,
            "recipientDoesNotHavePermissionToFileAcl" => Self::RecipientDoesNotHavePermissionToFileAcl,
            "fileDoesNotAllowDistribution" => Self::FileDoesNotAllowDistribution,
            "recipientReturnedAccessDenied" => Self::RecipientReturnedAccessDenied,
            "sourceFileMissing" => Self::SourceFileMissing,
            "unknownError" => Self::UnknownError,
            "encryptionKeyUnavailable" => Self::EncryptionKeyUnavailable,
            _ => Self::Enqueued,
        }
    }
}

/// The most recent problem recorded for a recipient, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LatestProblem {
    ServerPendingRetry,
    LocalFileDistributionDenied,
    AccessDenied,
    UnknownServerError,
    SourceFileMissing,
}

impl LatestProblem {
    pub fn for_result(result: TransferResult) -> Option<Self> {
        match result {
            TransferResult::Success => None,
            TransferResult::RecipientServerError
            | TransferResult::RecipientServerNotResponding
            | TransferResult::LocalTransientFailure => Some(Self::ServerPendingRetry),
            TransferResult::RecipientDoesNotHavePermissionToFileAcl
            | TransferResult::FileDoesNotAllowDistribution => Some(Self::LocalFileDistributionDenied),
            TransferResult::RecipientServerReturnedAccessDenied => Some(Self::AccessDenied),
            TransferResult::UnknownError => Some(Self::UnknownServerError),
            TransferResult::SourceFileMissing => Some(Self::SourceFileMissing),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerPendingRetry => "serverPendingRetry",
            Self::LocalFileDistributionDenied => "localFileDistributionDenied",
            Self::AccessDenied => "accessDenied",
            Self::UnknownServerError => "unknownServerError",
            Self::SourceFileMissing => "sourceFileMissing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "serverPendingRetry" => Some(Self::ServerPendingRetry),
            "localFileDistributionDenied" => Some(Self::LocalFileDistributionDenied),
            "accessDenied" => Some(Self::AccessDenied),
            "unknownServerError" => Some(Self::UnknownServerError),
            "sourceFileMissing" => Some(Self::SourceFileMissing),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_RESULTS: [TransferResult; 9] = [
        TransferResult::Success,
        TransferResult::RecipientServerReturnedAccessDenied,
        TransferResult::RecipientServerError,
        TransferResult::RecipientServerNotResponding,
        TransferResult::UnknownError,
        TransferResult::RecipientDoesNotHavePermissionToFileAcl,
        TransferResult::FileDoesNotAllowDistribution,
        TransferResult::SourceFileMissing,
        TransferResult::LocalTransientFailure,
    ];

    #[test]
    fn test_only_transient_results_are_rescheduled() {
        let rescheduled: Vec<_> = ALL_RESULTS
            .iter()
            .filter(|r| r.disposition() == Disposition::Reschedule)
            .collect();
        assert_eq!(
            rescheduled,
            vec![
                &TransferResult::RecipientServerError,
                &TransferResult::RecipientServerNotResponding,
                &TransferResult::LocalTransientFailure,
            ]
        );
    }

    #[test]
    fn test_status_strings_round_trip() {
        for result in ALL_RESULTS {
            let status = TransferStatus::from_result(result, None);
            assert_eq!(TransferStatus::from_str(status.as_str()), status);
            if let Some(problem) = LatestProblem::for_result(result) {
                assert_eq!(LatestProblem::from_str(problem.as_str()), Some(problem));
            }
        }
    }

    #[test]
    fn test_success_status_depends_on_response_code() {
        assert_eq!(
            TransferStatus::from_result(TransferResult::Success, Some(PeerResponseCode::AcceptedDirectWrite)),
            TransferStatus::Delivered
        );
        assert_eq!(
            TransferStatus::from_result(TransferResult::Success, Some(PeerResponseCode::AcceptedIntoInbox)),
            TransferStatus::DeliveredToInbox
        );
    }

    #[test]
    fn test_unknown_response_code_deserializes() {
        let code: PeerResponseCode = serde_json::from_str("\"somethingNew\"").unwrap();
        assert_eq!(code, PeerResponseCode::Unknown);
        assert!(!code.is_accepted());
    }
}
