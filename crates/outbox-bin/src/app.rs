//! Wiring of the outbox host and the command implementations.

use crate::local_peers::{LocalConnections, LocalTransferCrypto};
use crate::local_storage::LocalDriveStorage;
use chrono::{DateTime, Utc};
use outbox_config_and_utils::{Config, Paths, SealingKey};
use outbox_database::AsyncDatabase;
use outbox_driver::{DriverConfig, OutboxDriver, StaticTenantRegistry, TenantReport};
use peer_outbox::{
    Clock, InternalDriveFileId, OutboxQueue, OutboxStatus, PendingTenantIndex, Recipient, RecipientTransferStatus,
    ReclaimReport, SystemClock, TenantId, TransferHistory, TransferStatus, TransitOptions,
};
use peer_transfer::{
    ConnectionAclAuthorizer, DeliveryServices, DeliveryWorker, HttpPeerTransport, HttpTransportConfig,
    PeerTransferService, PeerTransport, RetryPolicy, WorkerConfig,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub type AppResult<T> = Result<T, Box<dyn Error>>;

/// Everything one process needs to serve the tenants under its base
/// directory.
pub struct Host {
    paths: Paths,
    config: Config,
    db: AsyncDatabase,
    pending: PendingTenantIndex,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn PeerTransport>,
    host_key: SealingKey,
    registry: Arc<StaticTenantRegistry>,
}

impl Host {
    pub async fn open(paths: Paths, config: Config) -> AppResult<Self> {
        let transport = HttpPeerTransport::new(transport_config(&config))?;
        Self::open_with_transport(paths, config, Arc::new(transport)).await
    }

    pub async fn open_with_transport(
        paths: Paths,
        config: Config,
        transport: Arc<dyn PeerTransport>,
    ) -> AppResult<Self> {
        paths.ensure_dirs()?;
        let db = AsyncDatabase::open(&paths.database_file()).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pending = PendingTenantIndex::new(db.clone(), clock.clone());
        let host_key = SealingKey::load_or_create(&paths.token_key_file())?;

        let host = Self {
            paths,
            config,
            db,
            pending,
            clock,
            transport,
            host_key,
            registry: Arc::new(StaticTenantRegistry::new()),
        };
        for tenant in host.discover_tenants()? {
            host.registry.insert(host.worker(&tenant));
        }
        info!(tenants = host.registry.tenants().len(), "Outbox host ready");
        Ok(host)
    }

    /// Tenants are the directories under `tenants/` named like a domain.
    fn discover_tenants(&self) -> AppResult<Vec<TenantId>> {
        let mut tenants = Vec::new();
        for entry in std::fs::read_dir(self.paths.tenants_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match TenantId::new(&name) {
                Ok(tenant) => tenants.push(tenant),
                Err(e) => warn!(dir = %name, error = %e, "Skipping tenant directory"),
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.registry.tenants()
    }

    fn require_tenant(&self, tenant: &TenantId) -> AppResult<()> {
        if self.registry.worker(tenant).is_none() {
            return Err(format!("unknown tenant {tenant}: no directory under {}", self.paths.tenants_dir().display()).into());
        }
        Ok(())
    }

    fn queue(&self, tenant: &TenantId) -> OutboxQueue {
        OutboxQueue::new(tenant.clone(), self.db.clone(), self.pending.clone(), self.clock.clone())
    }

    fn history(&self, tenant: &TenantId) -> TransferHistory {
        TransferHistory::new(tenant.clone(), self.db.clone(), self.clock.clone())
    }

    fn storage(&self, tenant: &TenantId) -> Arc<LocalDriveStorage> {
        Arc::new(LocalDriveStorage::new(self.paths.tenant_dir(tenant.as_str())))
    }

    fn crypto(&self, tenant: &TenantId) -> Arc<LocalTransferCrypto> {
        Arc::new(LocalTransferCrypto::new(
            self.host_key.clone(),
            LocalConnections::new(self.paths.tenant_dir(tenant.as_str())),
        ))
    }

    fn worker(&self, tenant: &TenantId) -> DeliveryWorker {
        let connections = Arc::new(LocalConnections::new(self.paths.tenant_dir(tenant.as_str())));
        let services = DeliveryServices::new(
            self.storage(tenant),
            Arc::new(ConnectionAclAuthorizer::new(connections)),
            self.crypto(tenant),
            self.transport.clone(),
            self.clock.clone(),
        );
        DeliveryWorker::new(
            self.queue(tenant),
            self.history(tenant),
            services,
            worker_config(&self.config),
        )
    }

    pub fn driver(&self) -> OutboxDriver {
        OutboxDriver::new(
            self.db.clone(),
            self.pending.clone(),
            self.registry.clone(),
            self.clock.clone(),
            DriverConfig::from(&self.config.outbox),
        )
    }

    /// Run the driver until `shutdown` fires.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> AppResult<()> {
        let handle = self.driver().start(shutdown);
        handle.await?;
        Ok(())
    }

    pub async fn process_outbox(&self, tenant: &TenantId, batch_size: usize) -> AppResult<TenantSummary> {
        self.require_tenant(tenant)?;
        let report = self.driver().process_tenant(tenant, batch_size).await;
        Ok(TenantSummary::from(&report))
    }

    pub async fn status(&self, only: Option<&TenantId>) -> AppResult<HostStatus> {
        let tenants = match only {
            Some(tenant) => {
                self.require_tenant(tenant)?;
                vec![tenant.clone()]
            }
            None => self.tenants(),
        };

        let mut outboxes = BTreeMap::new();
        for tenant in tenants {
            let status = self.queue(&tenant).status().await?;
            outboxes.insert(tenant, status);
        }

        let signals = self
            .pending
            .list()
            .await?
            .into_iter()
            .filter(|record| only.map_or(true, |tenant| &record.tenant == tenant))
            .map(|record| PendingSignal {
                tenant: record.tenant,
                signaled_at: record.signaled_at,
                next_scan_at: record.next_scan_at,
                leased: record.leased,
            })
            .collect();

        Ok(HostStatus { outboxes, signals })
    }

    pub async fn reclaim_leases(&self) -> AppResult<ReclaimReport> {
        Ok(self.driver().reclaim_expired().await?)
    }

    pub async fn send(
        &self,
        tenant: &TenantId,
        file: InternalDriveFileId,
        options: TransitOptions,
    ) -> AppResult<BTreeMap<Recipient, TransferStatus>> {
        self.require_tenant(tenant)?;
        let service = PeerTransferService::new(
            self.queue(tenant),
            self.history(tenant),
            self.storage(tenant),
            self.crypto(tenant),
        );
        Ok(service.send_file(file, options).await?)
    }

    pub async fn history_of(
        &self,
        tenant: &TenantId,
        file: &InternalDriveFileId,
    ) -> AppResult<BTreeMap<Recipient, RecipientTransferStatus>> {
        self.require_tenant(tenant)?;
        Ok(self.history(tenant).recipient_statuses(file).await?)
    }
}

fn transport_config(config: &Config) -> HttpTransportConfig {
    let transport = &config.transport;
    HttpTransportConfig {
        scheme: transport.scheme.clone(),
        port: transport.port,
        path: transport.path.clone(),
        connect_timeout: std::time::Duration::from_secs(transport.connect_timeout_secs),
        request_timeout: std::time::Duration::from_secs(transport.request_timeout_secs),
        ..HttpTransportConfig::default()
    }
}

fn worker_config(config: &Config) -> WorkerConfig {
    let outbox = &config.outbox;
    let retry = if outbox.retry_exponential {
        RetryPolicy::Exponential {
            base: outbox.retry_delay(),
            max: outbox.retry_max_delay(),
        }
    } else {
        RetryPolicy::Fixed(outbox.retry_delay())
    };
    WorkerConfig {
        recipient_concurrency: outbox.recipient_concurrency,
        retry,
    }
}

/// Printable result of a manual outbox pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub tenant: TenantId,
    pub outcome: String,
    pub batches: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub dropped: usize,
    pub transient_files_deleted: usize,
}

impl From<&TenantReport> for TenantSummary {
    fn from(report: &TenantReport) -> Self {
        Self {
            tenant: report.tenant.clone(),
            outcome: format!("{:?}", report.outcome),
            batches: report.batches,
            delivered: report.delivered,
            rescheduled: report.rescheduled,
            dropped: report.dropped,
            transient_files_deleted: report.transient_files_deleted,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSignal {
    pub tenant: TenantId,
    pub signaled_at: DateTime<Utc>,
    pub next_scan_at: DateTime<Utc>,
    pub leased: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pub outboxes: BTreeMap<TenantId, OutboxStatus>,
    pub signals: Vec<PendingSignal>,
}
