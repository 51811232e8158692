//! Outbox items and the typed fields stored with them.

use crate::ids::{BoxId, InternalDriveFileId, OutboxItemId, Recipient, TenantId};
use crate::result::{PeerResponseCode, TransferResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which parts of a file go over the wire. The header is always sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendContents {
    pub payloads: bool,
    pub thumbnails: bool,
}

impl SendContents {
    pub fn all() -> Self {
        Self {
            payloads: true,
            thumbnails: true,
        }
    }

    /// Header-only sync.
    pub fn header_only() -> Self {
        Self {
            payloads: false,
            thumbnails: false,
        }
    }
}

impl Default for SendContents {
    fn default() -> Self {
        Self::all()
    }
}

/// A drive on the recipient, addressed by alias and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDrive {
    pub alias: Uuid,
    #[serde(rename = "type")]
    pub drive_type: Uuid,
}

/// Push notification the recipient should raise once the file lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppNotificationOptions {
    pub app_id: Uuid,
    pub type_id: Uuid,
    pub tag_id: Uuid,
    #[serde(default)]
    pub silent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_message: Option<String>,
}

/// Caller-supplied delivery options, stored with every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitOptions {
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub send_contents: SendContents,
    #[serde(default)]
    pub is_transient_file: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub use_app_notification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_notification_options: Option<AppNotificationOptions>,
    /// Write to this drive on the recipient instead of the source drive's twin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_target_drive: Option<TargetDrive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_global_transit_id: Option<Uuid>,
}

impl TransitOptions {
    pub fn to(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients,
            send_contents: SendContents::all(),
            is_transient_file: false,
            priority: 0,
            use_app_notification: false,
            app_notification_options: None,
            remote_target_drive: None,
            override_global_transit_id: None,
        }
    }
}

/// Coarse audience of a file, the only part of an ACL a peer ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityGroup {
    Anonymous,
    Authenticated,
    AutoConnected,
    Connected,
    Owner,
}

/// An access-control list with every identity and circle list stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedAccessControlList {
    pub required_security_group: SecurityGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileSystemType {
    Standard,
    Comment,
}

/// Key header wrapped with the shared secret of the recipient connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyHeader {
    pub encryption_version: u32,
    #[serde(with = "crate::serde_b64")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::serde_b64")]
    pub encrypted_aes_key: Vec<u8>,
}

impl fmt::Debug for EncryptedKeyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKeyHeader")
            .field("encryption_version", &self.encryption_version)
            .field("encrypted_aes_key", &format_args!("<{} bytes>", self.encrypted_aes_key.len()))
            .finish()
    }
}

/// Recipient-facing decryption instructions for one transfer. Produced by
/// the crypto collaborator; the queue stores it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedTransferInstructionSet {
    pub target_drive: TargetDrive,
    pub file_system_type: FileSystemType,
    pub content_sent: SendContents,
    pub shared_secret_encrypted_key_header: EncryptedKeyHeader,
    pub access_control_list: RedactedAccessControlList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_notification_options: Option<AppNotificationOptions>,
}

/// The sender's credential to a recipient host, sealed at rest.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedClientAuthToken(Vec<u8>);

impl EncryptedClientAuthToken {
    pub fn new(sealed: Vec<u8>) -> Self {
        Self(sealed)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptedClientAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedClientAuthToken(<{} bytes>)", self.0.len())
    }
}

/// One past delivery attempt. Diagnostic only; attempts never gate retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub result: TransferResult,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<PeerResponseCode>,
}

/// A request to deliver one file to one recipient.
#[derive(Debug, Clone)]
pub struct NewOutboxItem {
    pub box_id: BoxId,
    pub recipient: Recipient,
    pub file: InternalDriveFileId,
    pub priority: i32,
    pub is_transient_file: bool,
    pub instructions: EncryptedTransferInstructionSet,
    pub options: TransitOptions,
    pub client_auth_token: EncryptedClientAuthToken,
}

impl NewOutboxItem {
    /// Item for `recipient` partitioned by the file's drive, taking
    /// priority and transience from the options.
    pub fn for_recipient(
        recipient: Recipient,
        file: InternalDriveFileId,
        instructions: EncryptedTransferInstructionSet,
        options: TransitOptions,
        client_auth_token: EncryptedClientAuthToken,
    ) -> crate::OutboxResult<Self> {
        Ok(Self {
            box_id: BoxId::for_drive(file.drive_id)?,
            recipient,
            file,
            priority: options.priority,
            is_transient_file: options.is_transient_file,
            instructions,
            options,
            client_auth_token,
        })
    }
}

/// A queued delivery as read back from the store.
#[derive(Debug, Clone)]
pub struct OutboxItem {
    pub id: OutboxItemId,
    pub tenant: TenantId,
    pub box_id: BoxId,
    pub recipient: Recipient,
    pub file: InternalDriveFileId,
    pub priority: i32,
    pub added_at: DateTime<Utc>,
    /// How many times the row has been leased, this lease included.
    pub lease_count: i64,
    pub is_transient_file: bool,
    pub instructions: EncryptedTransferInstructionSet,
    pub options: TransitOptions,
    pub client_auth_token: EncryptedClientAuthToken,
    pub attempts: Vec<Attempt>,
}
