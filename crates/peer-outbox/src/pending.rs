//! Cross-tenant index of tenants with outbox work.
//!
//! The driver scans this index instead of every tenant's queue, so finding
//! work costs O(signaled tenants). One record per tenant: repeated signals
//! collapse. A signal that arrives while the tenant is leased is remembered
//! and the record re-arms on commit, so no signal is lost to a concurrent
//! driver pass.

use crate::clock::Clock;
use crate::ids::TenantId;
use crate::lease::{LeaseId, PendingLease, PendingResolution};
use crate::{OutboxError, OutboxResult};
use chrono::{DateTime, Utc};
use outbox_database::{queries, AsyncDatabase};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Snapshot of one index record.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTenantRecord {
    pub tenant: TenantId,
    pub signaled_at: DateTime<Utc>,
    pub next_scan_at: DateTime<Utc>,
    pub leased: bool,
}

struct Inner {
    db: AsyncDatabase,
    clock: Arc<dyn Clock>,
    wake: Notify,
}

/// Persisted wake index shared by every tenant's queue and the driver.
///
/// Cheap to clone. Constructed explicitly and injected; tests create as
/// many isolated instances as they like.
#[derive(Clone)]
pub struct PendingTenantIndex {
    inner: Arc<Inner>,
}

impl PendingTenantIndex {
    pub fn new(db: AsyncDatabase, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                clock,
                wake: Notify::new(),
            }),
        }
    }

    /// Record that `tenant` has outbox work and wake the driver.
    pub async fn mark_pending(&self, tenant: &TenantId) -> OutboxResult<()> {
        let tenant_id = tenant.as_str().to_string();
        let now = self.inner.clock.now();
        self.inner
            .db
            .call(move |conn| queries::upsert_pending_tenant(conn, &tenant_id, now))
            .await?;

        debug!(tenant = %tenant, "Tenant marked pending");
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Wait until some tenant is marked pending. A signal raised while
    /// nobody waits is kept for the next call.
    pub async fn notified(&self) {
        self.inner.wake.notified().await;
    }

    /// Lease up to `max` currently due tenant records.
    pub async fn pop_signaled_tenants(&self, max: usize) -> OutboxResult<(Vec<TenantId>, PendingLease)> {
        if max == 0 {
            return Err(OutboxError::InvalidArgument("max tenants must be positive".to_string()));
        }

        let lease_id = LeaseId::generate();
        let lease_key = lease_id.as_str().to_string();
        let now = self.inner.clock.now();
        let raw = self
            .inner
            .db
            .call(move |conn| queries::pop_pending_tenants(conn, &lease_key, now, max))
            .await?;

        let mut tenants = Vec::with_capacity(raw.len());
        for tenant_id in raw {
            match TenantId::new(&tenant_id) {
                Ok(tenant) => tenants.push(tenant),
                Err(e) => {
                    // Unparseable records can never be served; drop them.
                    warn!(tenant_id = %tenant_id, error = %e, "Discarding invalid pending-tenant record");
                    let key = lease_id.as_str().to_string();
                    self.inner
                        .db
                        .call(move |conn| queries::commit_pending_tenant(conn, &key, &tenant_id, now))
                        .await?;
                }
            }
        }

        if !tenants.is_empty() {
            debug!(lease_id = %lease_id, count = tenants.len(), "Popped signaled tenants");
        }
        Ok((tenants.clone(), PendingLease::new(lease_id, tenants)))
    }

    /// Clear every tenant of the lease.
    pub async fn commit(&self, lease: PendingLease) -> OutboxResult<()> {
        let drained = lease.tenants().to_vec();
        self.resolve(
            lease,
            PendingResolution {
                drained,
                revisit_at: Vec::new(),
            },
        )
        .await
    }

    /// Re-arm every tenant of the lease for the next scan.
    pub async fn cancel(&self, lease: PendingLease) -> OutboxResult<()> {
        self.resolve(lease, PendingResolution::default()).await
    }

    /// Resolve each tenant of the lease individually.
    pub async fn resolve(&self, mut lease: PendingLease, resolution: PendingResolution) -> OutboxResult<()> {
        lease.mark_resolved();
        if lease.is_empty() {
            return Ok(());
        }

        let now = self.inner.clock.now();
        let covered: HashSet<&TenantId> = lease.tenants().iter().collect();
        for tenant in resolution
            .drained
            .iter()
            .chain(resolution.revisit_at.iter().map(|(t, _)| t))
        {
            if !covered.contains(tenant) {
                error!(lease_id = %lease.id(), tenant = %tenant, "Resolution names a tenant outside the pending lease");
                return Err(OutboxError::InvalidArgument(format!(
                    "tenant {tenant} is not covered by pending lease {}",
                    lease.id()
                )));
            }
        }

        let drained: HashSet<&TenantId> = resolution.drained.iter().collect();
        let mut plan: Vec<(String, Option<DateTime<Utc>>)> = Vec::with_capacity(lease.tenants().len());
        for tenant in lease.tenants() {
            if drained.contains(tenant) {
                plan.push((tenant.as_str().to_string(), None));
            } else {
                let at = resolution
                    .revisit_at
                    .iter()
                    .find(|(t, _)| t == tenant)
                    .map(|(_, at)| *at)
                    .unwrap_or(now);
                plan.push((tenant.as_str().to_string(), Some(at)));
            }
        }

        let lease_key = lease.id().as_str().to_string();
        let lost = self
            .inner
            .db
            .call(move |conn| {
                let mut lost = Vec::new();
                for (tenant_id, revisit) in plan {
                    let held = match revisit {
                        None => queries::commit_pending_tenant(conn, &lease_key, &tenant_id, now)?,
                        Some(at) => queries::rearm_pending_tenant(conn, &lease_key, &tenant_id, at, now)?,
                    };
                    if !held {
                        lost.push(tenant_id);
                    }
                }
                Ok(lost)
            })
            .await?;

        if !lost.is_empty() {
            error!(lease_id = %lease.id(), tenants = ?lost, "Pending lease no longer held its tenants");
            return Err(OutboxError::LeaseNotHeld {
                lease_id: lease.id().to_string(),
                expected: lease.tenants().len(),
            });
        }

        debug!(lease_id = %lease.id(), tenants = lease.tenants().len(), "Resolved pending lease");
        Ok(())
    }

    /// Release tenant leases older than `older_than`. The tenants become
    /// due immediately.
    pub async fn reclaim_expired(&self, older_than: chrono::Duration) -> OutboxResult<Vec<TenantId>> {
        let now = self.inner.clock.now();
        let threshold = now - older_than;
        let raw = self
            .inner
            .db
            .call(move |conn| queries::reclaim_expired_pending_tenants(conn, threshold, now))
            .await?;

        let tenants: Vec<TenantId> = raw.iter().filter_map(|t| TenantId::new(t).ok()).collect();
        if !tenants.is_empty() {
            self.inner.wake.notify_one();
        }
        Ok(tenants)
    }

    /// All records, due first.
    pub async fn list(&self) -> OutboxResult<Vec<PendingTenantRecord>> {
        let rows = self.inner.db.call(|conn| queries::list_pending_tenants(conn)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(PendingTenantRecord {
                    tenant: TenantId::new(&row.tenant_id).ok()?,
                    signaled_at: row.signaled_at,
                    next_scan_at: row.next_scan_at,
                    leased: row.lease_id.is_some(),
                })
            })
            .collect())
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}
