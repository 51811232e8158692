//! The metadata a recipient is allowed to see.
//!
//! Built from an allow-list: a field added to [`FileMetadata`] stays on this
//! host until it is added here too.

use crate::drive::{AppFileMetadata, FileMetadata, FileState, GlobalTransitIdFileIdentifier, PayloadDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedFileMetadata {
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    pub app_data: AppFileMetadata,
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_transit_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_preview: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_odin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_file: Option<GlobalTransitIdFileIdentifier>,
    pub version_tag: Uuid,
    pub payloads: Vec<PayloadDescriptor>,
    pub file_state: FileState,
}

impl RedactedFileMetadata {
    /// Copy the allow-listed fields. `override_global_transit_id` replaces
    /// the stored transit id when the sender asked for one.
    pub fn from_metadata(metadata: &FileMetadata, override_global_transit_id: Option<Uuid>) -> Self {
        Self {
            created: metadata.created,
            updated: metadata.updated,
            app_data: metadata.app_data.clone(),
            is_encrypted: metadata.is_encrypted,
            global_transit_id: override_global_transit_id.or(metadata.global_transit_id),
            reaction_preview: metadata.reaction_preview.clone(),
            sender_odin_id: metadata.sender_odin_id.clone(),
            referenced_file: metadata.referenced_file.clone(),
            version_tag: metadata.version_tag,
            payloads: metadata.payloads.clone(),
            file_state: metadata.file_state,
        }
    }
}
