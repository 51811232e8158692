//! Single-use lease tokens.
//!
//! A [`Lease`] is returned by `OutboxQueue::pop_batch` and a
//! [`PendingLease`] by `PendingTenantIndex::pop_signaled_tenants`. Both are
//! move-only: every resolving method takes the lease by value, so resolving
//! the same lease twice does not compile. A lease that was reclaimed after
//! expiry fails resolution with `OutboxError::LeaseNotHeld`.
//!
//! Dropping an unresolved, non-empty lease leaves its rows invisible until
//! the reclaimer releases them, so it is logged.

use crate::ids::{BoxId, OutboxItemId, TenantId};
use crate::item::Attempt;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Opaque lease identifier stamped on leased rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseId(String);

impl LeaseId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exclusive, temporary ownership of a batch of outbox rows.
#[must_use = "a lease must be committed, rescheduled or resolved"]
pub struct Lease {
    id: LeaseId,
    tenant: TenantId,
    box_id: BoxId,
    items: Vec<OutboxItemId>,
    leased_at: DateTime<Utc>,
    resolved: bool,
}

impl Lease {
    pub(crate) fn new(
        id: LeaseId,
        tenant: TenantId,
        box_id: BoxId,
        items: Vec<OutboxItemId>,
        leased_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant,
            box_id,
            items,
            leased_at,
            resolved: false,
        }
    }

    pub fn id(&self) -> &LeaseId {
        &self.id
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn box_id(&self) -> BoxId {
        self.box_id
    }

    pub fn items(&self) -> &[OutboxItemId] {
        &self.items
    }

    pub fn leased_at(&self) -> DateTime<Utc> {
        self.leased_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn covers(&self, item: OutboxItemId) -> bool {
        self.items.contains(&item)
    }

    pub(crate) fn mark_resolved(&mut self) {
        self.resolved = true;
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("box_id", &self.box_id)
            .field("items", &self.items.len())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.resolved && !self.items.is_empty() {
            warn!(
                lease_id = %self.id,
                tenant = %self.tenant,
                box_id = %self.box_id,
                items = self.items.len(),
                "Outbox lease dropped without resolution; rows stay leased until reclaimed"
            );
        }
    }
}

/// A leased row going back to the queue.
#[derive(Debug, Clone)]
pub struct RescheduledItem {
    pub item: OutboxItemId,
    pub not_before: DateTime<Utc>,
    /// Full attempt log to store, including the attempt just made.
    pub attempts: Vec<Attempt>,
}

/// Per-row resolution of a lease. Rows named in neither list are released
/// back to the queue immediately.
#[derive(Debug, Clone, Default)]
pub struct LeaseResolution {
    pub committed: Vec<OutboxItemId>,
    pub rescheduled: Vec<RescheduledItem>,
}

impl LeaseResolution {
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.rescheduled.is_empty()
    }
}

/// Exclusive ownership of a set of pending-tenant records.
#[must_use = "a pending lease must be committed, cancelled or resolved"]
pub struct PendingLease {
    id: LeaseId,
    tenants: Vec<TenantId>,
    resolved: bool,
}

impl PendingLease {
    pub(crate) fn new(id: LeaseId, tenants: Vec<TenantId>) -> Self {
        Self {
            id,
            tenants,
            resolved: false,
        }
    }

    pub fn id(&self) -> &LeaseId {
        &self.id
    }

    pub fn tenants(&self) -> &[TenantId] {
        &self.tenants
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub(crate) fn mark_resolved(&mut self) {
        self.resolved = true;
    }
}

impl fmt::Debug for PendingLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLease")
            .field("id", &self.id)
            .field("tenants", &self.tenants)
            .finish()
    }
}

impl Drop for PendingLease {
    fn drop(&mut self) {
        if !self.resolved && !self.tenants.is_empty() {
            warn!(
                lease_id = %self.id,
                tenants = self.tenants.len(),
                "Pending-tenant lease dropped without resolution"
            );
        }
    }
}

/// Per-tenant resolution of a pending lease. Tenants named in neither list
/// are re-armed for the next scan.
#[derive(Debug, Clone, Default)]
pub struct PendingResolution {
    /// Tenants whose queues were fully drained.
    pub drained: Vec<TenantId>,
    /// Tenants to revisit no earlier than the given time.
    pub revisit_at: Vec<(TenantId, DateTime<Utc>)>,
}
