//! Recovery of expired leases.
//!
//! A worker that dies mid-flight leaves its rows leased. The driver calls
//! [`reclaim_expired_leases`] periodically; anything leased for longer than
//! the lease timeout goes back to the visible queue and its tenant is
//! signaled again. Every reclaimed lease is logged at error level: it
//! means a pass crashed or hung.

use crate::ids::TenantId;
use crate::pending::PendingTenantIndex;
use crate::OutboxResult;
use chrono::Duration;
use outbox_database::{queries, AsyncDatabase};
use std::collections::BTreeSet;
use tracing::error;

/// What one reclaim sweep released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub outbox_leases: usize,
    pub outbox_rows: usize,
    pub pending_leases: usize,
    /// Tenants re-signaled because their rows were released.
    pub tenants: Vec<TenantId>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.outbox_leases == 0 && self.pending_leases == 0
    }
}

/// Release outbox and pending-tenant leases older than `lease_timeout`.
pub async fn reclaim_expired_leases(
    db: &AsyncDatabase,
    pending: &PendingTenantIndex,
    lease_timeout: Duration,
) -> OutboxResult<ReclaimReport> {
    let threshold = pending.clock().now() - lease_timeout;
    let expired = db
        .call(move |conn| queries::reclaim_expired_outbox_leases(conn, threshold))
        .await?;

    let mut report = ReclaimReport::default();
    let mut tenants = BTreeSet::new();
    for lease in &expired {
        error!(
            lease_id = %lease.lease_id,
            tenant = %lease.tenant_id,
            rows = lease.rows,
            "Reclaimed expired outbox lease"
        );
        report.outbox_leases += 1;
        report.outbox_rows += lease.rows;
        if let Ok(tenant) = TenantId::new(&lease.tenant_id) {
            tenants.insert(tenant);
        }
    }

    for tenant in pending.reclaim_expired(lease_timeout).await? {
        error!(tenant = %tenant, "Reclaimed expired pending-tenant lease");
        report.pending_leases += 1;
    }

    for tenant in &tenants {
        pending.mark_pending(tenant).await?;
    }
    report.tenants = tenants.into_iter().collect();
    Ok(report)
}
