//! The multipart body sent to a recipient host.
//!
//! Parts always go out in this order: `TransferKeyHeader`, `Metadata`, one
//! `Payload` per payload key, then one `Thumbnail` per thumbnail. Payload
//! and thumbnail bodies are streams opened from storage and never buffered.

use crate::drive::{ByteStream, DriveStorage, ServerFileHeader};
use crate::error::StorageError;
use crate::redact::RedactedFileMetadata;
use bytes::Bytes;
use peer_outbox::{EncryptedTransferInstructionSet, InternalDriveFileId, PeerResponseCode, TransitOptions};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const INSTRUCTIONS_FILE_NAME: &str = "transferInstructionSet.encrypted";
pub const METADATA_FILE_NAME: &str = "metadata.encrypted";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const PAYLOAD_CONTENT_TYPE: &str = "application/unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    TransferKeyHeader,
    Metadata,
    Payload,
    Thumbnail,
}

impl PartKind {
    /// Form field name of the part.
    pub fn name(self) -> &'static str {
        match self {
            Self::TransferKeyHeader => "TransferKeyHeader",
            Self::Metadata => "Metadata",
            Self::Payload => "Payload",
            Self::Thumbnail => "Thumbnail",
        }
    }
}

pub enum PartBody {
    Json(Bytes),
    Stream { stream: ByteStream, length: Option<u64> },
}

impl fmt::Debug for PartBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(bytes) => write!(f, "Json(<{} bytes>)", bytes.len()),
            Self::Stream { length, .. } => write!(f, "Stream(length={:?})", length),
        }
    }
}

#[derive(Debug)]
pub struct OutgoingPart {
    pub kind: PartKind,
    pub file_name: String,
    pub content_type: String,
    pub body: PartBody,
}

/// Ordered parts of one transfer.
#[derive(Debug, Default)]
pub struct TransferBody {
    parts: Vec<OutgoingPart>,
}

impl TransferBody {
    pub fn from_parts(parts: Vec<OutgoingPart>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[OutgoingPart] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<OutgoingPart> {
        self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Response body of a recipient host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTransferResponse {
    pub code: PeerResponseCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn thumbnail_part_name(payload_key: &str, width: u32, height: u32) -> String {
    format!("{}:{}:{}", payload_key, width, height)
}

fn json_part<T: Serialize>(kind: PartKind, file_name: &str, value: &T) -> Result<OutgoingPart, StorageError> {
    let json = serde_json::to_vec(value).map_err(|e| StorageError::Malformed(e.to_string()))?;
    Ok(OutgoingPart {
        kind,
        file_name: file_name.to_string(),
        content_type: JSON_CONTENT_TYPE.to_string(),
        body: PartBody::Json(Bytes::from(json)),
    })
}

/// Assemble the body for one item from the freshly read header.
///
/// Payloads and thumbnails are included only when the instructions say
/// they were sent; a header-only sync carries just the first two parts.
pub async fn build_transfer_body(
    storage: &dyn DriveStorage,
    file: &InternalDriveFileId,
    header: &ServerFileHeader,
    instructions: &EncryptedTransferInstructionSet,
    options: &TransitOptions,
) -> Result<TransferBody, StorageError> {
    let mut parts = Vec::with_capacity(2);
    parts.push(json_part(PartKind::TransferKeyHeader, INSTRUCTIONS_FILE_NAME, instructions)?);

    let metadata = RedactedFileMetadata::from_metadata(&header.file_metadata, options.override_global_transit_id);
    parts.push(json_part(PartKind::Metadata, METADATA_FILE_NAME, &metadata)?);

    let payloads = &header.file_metadata.payloads;
    if instructions.content_sent.payloads {
        for payload in payloads {
            let stream = storage.get_payload_stream(file, &payload.key, None).await?;
            parts.push(OutgoingPart {
                kind: PartKind::Payload,
                file_name: payload.key.clone(),
                content_type: PAYLOAD_CONTENT_TYPE.to_string(),
                body: PartBody::Stream {
                    stream,
                    length: (payload.bytes_written > 0).then_some(payload.bytes_written),
                },
            });
        }
    }

    if instructions.content_sent.thumbnails {
        for payload in payloads {
            for thumb in &payload.thumbnails {
                let stream = storage
                    .get_thumbnail_stream(file, &payload.key, thumb.pixel_width, thumb.pixel_height)
                    .await?;
                parts.push(OutgoingPart {
                    kind: PartKind::Thumbnail,
                    file_name: thumbnail_part_name(&payload.key, thumb.pixel_width, thumb.pixel_height),
                    content_type: thumb.content_type.clone(),
                    body: PartBody::Stream {
                        stream,
                        length: (thumb.bytes_written > 0).then_some(thumb.bytes_written),
                    },
                });
            }
        }
    }

    Ok(TransferBody::from_parts(parts))
}
