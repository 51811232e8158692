//! Recipient permission checks against a file's access-control list.

use crate::drive::AccessControlList;
use crate::error::StorageError;
use async_trait::async_trait;
use peer_outbox::{Recipient, SecurityGroup};
use std::sync::Arc;
use uuid::Uuid;

/// What this host knows about its relationship with a recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientStanding {
    pub connected: bool,
    /// Connected automatically through an introduction.
    pub auto_connected: bool,
    pub blocked: bool,
    pub circles: Vec<Uuid>,
}

#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    async fn standing(&self, recipient: &Recipient) -> Result<RecipientStanding, StorageError>;
}

#[async_trait]
pub trait AclAuthorizer: Send + Sync {
    /// Whether `recipient` may currently receive a file guarded by `acl`.
    async fn identity_has_permission(&self, recipient: &Recipient, acl: &AccessControlList) -> Result<bool, StorageError>;
}

/// Decide access from a standing alone.
pub fn evaluate(acl: &AccessControlList, recipient: &Recipient, standing: &RecipientStanding) -> bool {
    if standing.blocked {
        return false;
    }

    let group_ok = match acl.required_security_group {
        SecurityGroup::Anonymous | SecurityGroup::Authenticated => true,
        SecurityGroup::AutoConnected => standing.connected || standing.auto_connected,
        SecurityGroup::Connected => standing.connected,
        SecurityGroup::Owner => false,
    };
    if !group_ok {
        return false;
    }

    if acl.odin_id_list.is_empty() && acl.circle_id_list.is_empty() {
        return true;
    }
    acl.odin_id_list.contains(recipient) || acl.circle_id_list.iter().any(|c| standing.circles.contains(c))
}

/// Authorizer backed by a [`ConnectionDirectory`].
pub struct ConnectionAclAuthorizer {
    directory: Arc<dyn ConnectionDirectory>,
}

impl ConnectionAclAuthorizer {
    pub fn new(directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl AclAuthorizer for ConnectionAclAuthorizer {
    async fn identity_has_permission(&self, recipient: &Recipient, acl: &AccessControlList) -> Result<bool, StorageError> {
        let standing = self.directory.standing(recipient).await?;
        Ok(evaluate(acl, recipient, &standing))
    }
}
