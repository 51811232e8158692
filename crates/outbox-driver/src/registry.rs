//! How the driver finds a tenant's outbox.

use crate::DriverResult;
use async_trait::async_trait;
use peer_outbox::{BoxId, OutboxStatus, TenantId};
use peer_transfer::{BatchReport, DeliveryWorker};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// The part of a tenant's delivery pipeline the driver schedules.
#[async_trait]
pub trait TenantOutbox: Send + Sync {
    fn tenant(&self) -> &TenantId;

    /// Boxes with at least one visible item.
    async fn due_boxes(&self) -> DriverResult<Vec<BoxId>>;

    /// Lease, deliver and resolve one batch. `None` when the box was empty.
    async fn process_next(&self, box_id: BoxId, batch_size: usize) -> DriverResult<Option<BatchReport>>;

    async fn status(&self) -> DriverResult<OutboxStatus>;
}

#[async_trait]
impl TenantOutbox for DeliveryWorker {
    fn tenant(&self) -> &TenantId {
        DeliveryWorker::tenant(self)
    }

    async fn due_boxes(&self) -> DriverResult<Vec<BoxId>> {
        Ok(self.queue().due_boxes().await?)
    }

    async fn process_next(&self, box_id: BoxId, batch_size: usize) -> DriverResult<Option<BatchReport>> {
        Ok(DeliveryWorker::process_next(self, box_id, batch_size).await?)
    }

    async fn status(&self) -> DriverResult<OutboxStatus> {
        Ok(self.queue().status().await?)
    }
}

/// Resolves signaled tenants to their outbox.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// The outbox of `tenant`, with in-flight transmissions bound to
    /// `cancel`. `None` when this host does not serve the tenant.
    async fn outbox_for(
        &self,
        tenant: &TenantId,
        cancel: CancellationToken,
    ) -> DriverResult<Option<Arc<dyn TenantOutbox>>>;
}

/// Registry over workers built up front.
#[derive(Default)]
pub struct StaticTenantRegistry {
    workers: RwLock<HashMap<TenantId, DeliveryWorker>>,
}

impl StaticTenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, worker: DeliveryWorker) {
        let tenant = worker.tenant().clone();
        self.workers
            .write()
            .expect("registry lock poisoned")
            .insert(tenant, worker);
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self
            .workers
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        tenants.sort();
        tenants
    }

    pub fn worker(&self, tenant: &TenantId) -> Option<DeliveryWorker> {
        self.workers
            .read()
            .expect("registry lock poisoned")
            .get(tenant)
            .cloned()
    }
}

#[async_trait]
impl TenantRegistry for StaticTenantRegistry {
    async fn outbox_for(
        &self,
        tenant: &TenantId,
        cancel: CancellationToken,
    ) -> DriverResult<Option<Arc<dyn TenantOutbox>>> {
        Ok(self
            .worker(tenant)
            .map(|worker| Arc::new(worker.with_cancellation(cancel)) as Arc<dyn TenantOutbox>))
    }
}
