//! Mapping transmit outcomes onto the failure taxonomy.

use crate::transport::TransmitOutcome;
use peer_outbox::{PeerResponseCode, TransferResult};

/// A classified outcome with the raw signals it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub result: TransferResult,
    pub http_status: Option<u16>,
    pub response_code: Option<PeerResponseCode>,
}

pub fn classify(outcome: &TransmitOutcome) -> Classification {
    match outcome {
        TransmitOutcome::Response { status, body } => {
            let response_code = body.as_ref().map(|b| b.code);
            let result = match *status {
                200..=299 => match response_code {
                    Some(code) if code.is_accepted() => TransferResult::Success,
                    Some(PeerResponseCode::AccessDenied) => TransferResult::RecipientServerReturnedAccessDenied,
                    _ => TransferResult::UnknownError,
                },
                403 => TransferResult::RecipientServerReturnedAccessDenied,
                500..=599 => TransferResult::RecipientServerError,
                _ => TransferResult::UnknownError,
            };
            Classification {
                result,
                http_status: Some(*status),
                response_code,
            }
        }
        TransmitOutcome::Timeout | TransmitOutcome::Unreachable(_) | TransmitOutcome::Canceled => Classification {
            result: TransferResult::RecipientServerNotResponding,
            http_status: None,
            response_code: None,
        },
        TransmitOutcome::Failed(_) => Classification {
            result: TransferResult::UnknownError,
            http_status: None,
            response_code: None,
        },
    }
}
