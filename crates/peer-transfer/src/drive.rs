//! The slice of drive storage the outbox reads from.
//!
//! Headers and payloads are owned by the drive layer; the outbox only ever
//! re-reads a header at delivery time, opens payload and thumbnail streams,
//! and hard-deletes transient files once every recipient has been serviced.

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use peer_outbox::{EncryptedKeyHeader, FileSystemType, InternalDriveFileId, RedactedAccessControlList, Recipient, SecurityGroup, TargetDrive};
use serde::{Deserialize, Serialize};
use std::io;
use std::ops::Range;
use std::pin::Pin;
use uuid::Uuid;

/// A streamed payload body.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Access-control list as stored on the sender. Only the security group
/// leaves the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlList {
    pub required_security_group: SecurityGroup,
    #[serde(default)]
    pub odin_id_list: Vec<Recipient>,
    #[serde(default)]
    pub circle_id_list: Vec<Uuid>,
}

impl AccessControlList {
    pub fn redacted(&self) -> RedactedAccessControlList {
        RedactedAccessControlList {
            required_security_group: self.required_security_group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailDescriptor {
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub content_type: String,
    #[serde(default)]
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadDescriptor {
    pub key: String,
    pub content_type: String,
    #[serde(default)]
    pub bytes_written: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailDescriptor>,
}

/// Application-defined portion of the metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppFileMetadata {
    #[serde(default)]
    pub file_type: i32,
    #[serde(default)]
    pub data_type: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_date: Option<i64>,
}

/// A file another file refers to, addressed globally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTransitIdFileIdentifier {
    pub target_drive: TargetDrive,
    pub global_transit_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileState {
    #[default]
    Active,
    Deleted,
}

/// File metadata as stored locally, including fields that never leave the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: Uuid,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_data: AppFileMetadata,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_transit_id: Option<Uuid>,
    /// Summary of reactions, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_preview: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_odin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_file: Option<GlobalTransitIdFileIdentifier>,
    pub version_tag: Uuid,
    #[serde(default)]
    pub payloads: Vec<PayloadDescriptor>,
    #[serde(default)]
    pub file_state: FileState,
    /// Host-local application state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_app_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub access_control_list: AccessControlList,
    #[serde(default)]
    pub allow_distribution: bool,
    #[serde(default = "default_file_system_type")]
    pub file_system_type: FileSystemType,
    #[serde(default)]
    pub file_byte_count: u64,
}

fn default_file_system_type() -> FileSystemType {
    FileSystemType::Standard
}

/// Full header of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFileHeader {
    pub file_metadata: FileMetadata,
    pub server_metadata: ServerMetadata,
    /// The file's AES key, sealed with this host's storage key. Absent for
    /// unencrypted files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key_header: Option<EncryptedKeyHeader>,
}

impl ServerFileHeader {
    pub fn version_tag(&self) -> Uuid {
        self.file_metadata.version_tag
    }

    pub fn allows_distribution(&self) -> bool {
        self.server_metadata.allow_distribution
    }
}

/// Drive storage the worker and the send service read from.
#[async_trait]
pub trait DriveStorage: Send + Sync {
    /// Current header of `file`, or `None` when it no longer exists.
    async fn get_server_file_header(&self, file: &InternalDriveFileId)
        -> Result<Option<ServerFileHeader>, StorageError>;

    /// Stream a payload, optionally limited to a byte range.
    async fn get_payload_stream(
        &self,
        file: &InternalDriveFileId,
        key: &str,
        range: Option<Range<u64>>,
    ) -> Result<ByteStream, StorageError>;

    async fn get_thumbnail_stream(
        &self,
        file: &InternalDriveFileId,
        payload_key: &str,
        width: u32,
        height: u32,
    ) -> Result<ByteStream, StorageError>;

    /// Alias and type of a local drive, as the recipient addresses it.
    async fn target_drive(&self, drive_id: Uuid) -> Result<Option<TargetDrive>, StorageError>;

    /// Remove the file with its payloads and thumbnails.
    async fn hard_delete_file(&self, file: &InternalDriveFileId) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parses_with_defaults() {
        let json = r#"{
            "fileMetadata": {
                "fileId": "6f1f2ab0-6c1f-4d0e-9d7a-0f5b2c7d8e91",
                "created": "2026-01-01T00:00:00Z",
                "versionTag": "0b6d8c43-1f0c-4f1b-8a57-2d5e5a0b7c11"
            },
            "serverMetadata": {
                "accessControlList": { "requiredSecurityGroup": "connected" }
            }
        }"#;
        let header: ServerFileHeader = serde_json::from_str(json).unwrap();
        assert!(!header.allows_distribution());
        assert_eq!(header.server_metadata.file_system_type, FileSystemType::Standard);
        assert_eq!(header.file_metadata.file_state, FileState::Active);
        assert!(header.file_metadata.payloads.is_empty());
        assert!(header.encrypted_key_header.is_none());
        assert_eq!(
            header.server_metadata.access_control_list.redacted().required_security_group,
            SecurityGroup::Connected
        );
    }
}
