//! Identifiers used across the outbox.
//!
//! Tenants and recipients are identity hosts addressed by domain name.
//! Files are referenced by drive-relative ids only; the queue never holds a
//! handle into drive storage.

use crate::{OutboxError, OutboxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Normalize and validate a domain-shaped identity.
fn validate_domain(kind: &str, raw: &str) -> OutboxResult<String> {
    let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if name.is_empty() || name.len() > MAX_DOMAIN_LEN {
        return Err(OutboxError::InvalidIdentifier(format!("{kind} '{raw}' has invalid length")));
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err(OutboxError::InvalidIdentifier(format!(
            "{kind} '{raw}' must have at least two labels"
        )));
    }
    for label in labels {
        let valid = !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid {
            return Err(OutboxError::InvalidIdentifier(format!(
                "{kind} '{raw}' has invalid label '{label}'"
            )));
        }
    }
    Ok(name)
}

macro_rules! domain_identity {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: &str) -> OutboxResult<Self> {
                validate_domain($kind, raw).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = OutboxError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = OutboxError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

domain_identity!(
    /// The identity host that owns an outbox.
    TenantId,
    "tenant"
);

domain_identity!(
    /// The identity host a file is delivered to.
    Recipient,
    "recipient"
);

impl Recipient {
    /// Whether this recipient is the sending tenant itself.
    pub fn is_tenant(&self, tenant: &TenantId) -> bool {
        self.as_str() == tenant.as_str()
    }
}

/// Queue partition key. In practice the id of the drive being replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoxId(Uuid);

impl BoxId {
    pub fn new(id: Uuid) -> OutboxResult<Self> {
        if id.is_nil() {
            return Err(OutboxError::InvalidArgument("box id must not be nil".to_string()));
        }
        Ok(Self(id))
    }

    /// The box that holds work for one drive.
    pub fn for_drive(drive_id: Uuid) -> OutboxResult<Self> {
        Self::new(drive_id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl FromStr for BoxId {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s).map_err(|e| OutboxError::InvalidIdentifier(format!("box '{s}': {e}")))?;
        Self::new(id)
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A file on one of the tenant's drives. Never sent over the wire as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalDriveFileId {
    pub drive_id: Uuid,
    pub file_id: Uuid,
}

impl InternalDriveFileId {
    pub fn new(drive_id: Uuid, file_id: Uuid) -> OutboxResult<Self> {
        if drive_id.is_nil() || file_id.is_nil() {
            return Err(OutboxError::InvalidIdentifier(
                "drive and file ids must not be nil".to_string(),
            ));
        }
        Ok(Self { drive_id, file_id })
    }

    pub(crate) fn from_columns(drive_id: &str, file_id: &str) -> Option<Self> {
        let drive_id = Uuid::parse_str(drive_id).ok()?;
        let file_id = Uuid::parse_str(file_id).ok()?;
        Self::new(drive_id, file_id).ok()
    }
}

impl fmt::Display for InternalDriveFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.drive_id, self.file_id)
    }
}

/// Row id of an outbox item, unique within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutboxItemId(pub(crate) i64);

impl OutboxItemId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OutboxItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
