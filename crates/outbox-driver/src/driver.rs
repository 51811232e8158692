//! The outbox scheduling loop.
//!
//! One driver per process. Each pass leases the due records of the pending
//! tenant index, drives every tenant on a bounded pool, and resolves the
//! index lease with one outcome per tenant:
//!
//! | Outcome | Index record |
//! |---|---|
//! | `Drained` | committed (kept if signaled again meanwhile) |
//! | `Unfinished` | re-armed, due now |
//! | `Deferred(at)` | re-armed, due at `at` |
//! | `Failed` | re-armed after the retry delay |

use crate::registry::TenantRegistry;
use crate::DriverResult;
use chrono::{DateTime, Utc};
use outbox_config_and_utils::OutboxSettings;
use outbox_database::AsyncDatabase;
use peer_outbox::{reclaim_expired_leases, Clock, PendingResolution, PendingTenantIndex, ReclaimReport, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub batch_size: usize,
    pub max_batches_per_tenant_pass: usize,
    pub tenant_pass_budget: Duration,
    pub max_concurrent_tenants: usize,
    pub max_tenants_per_scan: usize,
    pub poll_interval: Duration,
    pub lease_timeout: Duration,
    pub reclaim_interval: Duration,
    /// How long a tenant whose pass failed waits before the next one.
    pub retry_delay: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&OutboxSettings::default())
    }
}

impl From<&OutboxSettings> for DriverConfig {
    fn from(settings: &OutboxSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            max_batches_per_tenant_pass: settings.max_batches_per_tenant_pass,
            tenant_pass_budget: settings.tenant_pass_budget(),
            max_concurrent_tenants: settings.max_concurrent_tenants,
            max_tenants_per_scan: settings.max_tenants_per_scan,
            poll_interval: settings.poll_interval(),
            lease_timeout: settings.lease_timeout(),
            reclaim_interval: settings.reclaim_interval(),
            retry_delay: settings.retry_delay(),
        }
    }
}

/// How one tenant's pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantOutcome {
    /// Nothing left to deliver.
    Drained,
    /// Stopped by the batch count, the time budget or shutdown.
    Unfinished,
    /// Only backed-off items remain; the earliest becomes visible at the
    /// given time.
    Deferred(DateTime<Utc>),
    Failed(String),
}

/// What one tenant's pass did.
#[derive(Debug, Clone)]
pub struct TenantReport {
    pub tenant: TenantId,
    pub outcome: TenantOutcome,
    pub batches: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub dropped: usize,
    pub transient_files_deleted: usize,
}

impl TenantReport {
    fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            outcome: TenantOutcome::Drained,
            batches: 0,
            delivered: 0,
            rescheduled: 0,
            dropped: 0,
            transient_files_deleted: 0,
        }
    }
}

/// Summary of one scan of the pending tenant index.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub tenants: Vec<TenantReport>,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn delivered(&self) -> usize {
        self.tenants.iter().map(|t| t.delivered).sum()
    }

    pub fn count(&self, matches: impl Fn(&TenantOutcome) -> bool) -> usize {
        self.tenants.iter().filter(|t| matches(&t.outcome)).count()
    }
}

struct Inner {
    db: AsyncDatabase,
    pending: PendingTenantIndex,
    registry: Arc<dyn TenantRegistry>,
    clock: Arc<dyn Clock>,
    config: DriverConfig,
    stop: CancellationToken,
}

/// Background scheduler over every tenant's outbox.
#[derive(Clone)]
pub struct OutboxDriver {
    inner: Arc<Inner>,
}

impl OutboxDriver {
    pub fn new(
        db: AsyncDatabase,
        pending: PendingTenantIndex,
        registry: Arc<dyn TenantRegistry>,
        clock: Arc<dyn Clock>,
        config: DriverConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                pending,
                registry,
                clock,
                config,
                stop: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Spawn the scheduling loop.
    ///
    /// A pass runs on every index signal and every poll tick. The loop ends
    /// when `shutdown` fires or its sender goes away; in-flight
    /// transmissions are canceled (and so rescheduled) and the task returns
    /// once the running pass has resolved its leases.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let stop = self.inner.stop.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            stop.cancel();
        });

        let driver = self.clone();
        tokio::spawn(async move {
            let config = &driver.inner.config;
            let mut ticker = interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_reclaim = Instant::now();

            info!(
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                max_concurrent_tenants = config.max_concurrent_tenants,
                "Outbox driver started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = driver.inner.stop.cancelled() => break,
                    _ = driver.inner.pending.notified() => {}
                    _ = ticker.tick() => {}
                }

                if last_reclaim.elapsed() >= config.reclaim_interval {
                    last_reclaim = Instant::now();
                    if let Err(e) = driver.reclaim_expired().await {
                        error!(error = %e, "Lease reclamation failed");
                    }
                }

                match driver.run_pass().await {
                    Ok(report) if !report.is_empty() => debug!(
                        tenants = report.tenants.len(),
                        delivered = report.delivered(),
                        "Outbox pass finished"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Outbox pass failed"),
                }
            }

            info!("Outbox driver stopped");
        })
    }

    /// Stop picking new tenants and batches. Also done by `start`'s
    /// shutdown signal.
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }

    /// Scan the pending index once and drive every due tenant.
    pub async fn run_pass(&self) -> DriverResult<PassReport> {
        let inner = &self.inner;
        let (tenants, lease) = inner
            .pending
            .pop_signaled_tenants(inner.config.max_tenants_per_scan.max(1))
            .await?;
        if tenants.is_empty() {
            inner.pending.commit(lease).await?;
            return Ok(PassReport::default());
        }

        let semaphore = Arc::new(Semaphore::new(inner.config.max_concurrent_tenants.max(1)));
        let mut tasks = JoinSet::new();
        for tenant in tenants {
            if inner.stop.is_cancelled() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let driver = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                driver.drive_tenant(tenant, driver.inner.config.batch_size).await
            });
        }

        let now = inner.clock.now();
        let mut report = PassReport::default();
        let mut resolution = PendingResolution::default();
        while let Some(joined) = tasks.join_next().await {
            let tenant_report = match joined {
                Ok(tenant_report) => tenant_report,
                Err(e) => {
                    // The tenant stays out of the resolution and is re-armed.
                    error!(error = %e, "Tenant task panicked");
                    continue;
                }
            };
            match &tenant_report.outcome {
                TenantOutcome::Drained => resolution.drained.push(tenant_report.tenant.clone()),
                TenantOutcome::Unfinished => {}
                TenantOutcome::Deferred(at) => resolution.revisit_at.push((tenant_report.tenant.clone(), *at)),
                TenantOutcome::Failed(_) => resolution
                    .revisit_at
                    .push((tenant_report.tenant.clone(), now + retry_delay(&inner.config))),
            }
            report.tenants.push(tenant_report);
        }

        inner.pending.resolve(lease, resolution).await?;
        Ok(report)
    }

    /// Drive one tenant outside the index, as the manual trigger does.
    pub async fn process_tenant(&self, tenant: &TenantId, batch_size: usize) -> TenantReport {
        self.drive_tenant(tenant.clone(), batch_size).await
    }

    /// Release queue and index leases older than the lease timeout.
    pub async fn reclaim_expired(&self) -> DriverResult<ReclaimReport> {
        let timeout = chrono::Duration::from_std(self.inner.config.lease_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let report = reclaim_expired_leases(&self.inner.db, &self.inner.pending, timeout).await?;
        if !report.is_empty() {
            warn!(
                outbox_leases = report.outbox_leases,
                outbox_rows = report.outbox_rows,
                pending_leases = report.pending_leases,
                "Reclaimed expired leases"
            );
        }
        Ok(report)
    }

    async fn drive_tenant(&self, tenant: TenantId, batch_size: usize) -> TenantReport {
        let mut report = TenantReport::new(tenant);
        if let Err(e) = self.try_drive_tenant(&mut report, batch_size).await {
            warn!(tenant = %report.tenant, error = %e, "Tenant pass failed");
            report.outcome = TenantOutcome::Failed(e.to_string());
        }
        debug!(
            tenant = %report.tenant,
            outcome = ?report.outcome,
            batches = report.batches,
            delivered = report.delivered,
            "Tenant pass done"
        );
        report
    }

    async fn try_drive_tenant(&self, report: &mut TenantReport, batch_size: usize) -> DriverResult<()> {
        let inner = &self.inner;
        let Some(outbox) = inner
            .registry
            .outbox_for(&report.tenant, inner.stop.child_token())
            .await?
        else {
            warn!(tenant = %report.tenant, "Signaled tenant is not served here; dropping signal");
            return Ok(());
        };

        let started = Instant::now();
        loop {
            let boxes = outbox.due_boxes().await?;
            if boxes.is_empty() {
                break;
            }
            for box_id in boxes {
                if report.batches >= inner.config.max_batches_per_tenant_pass
                    || started.elapsed() >= inner.config.tenant_pass_budget
                    || inner.stop.is_cancelled()
                {
                    report.outcome = TenantOutcome::Unfinished;
                    return Ok(());
                }
                report.batches += 1;
                if let Some(batch) = outbox.process_next(box_id, batch_size).await? {
                    report.delivered += batch.delivered;
                    report.rescheduled += batch.rescheduled;
                    report.dropped += batch.dropped;
                    report.transient_files_deleted += batch.transient_files_deleted;
                }
            }
        }

        let status = outbox.status().await?;
        report.outcome = match status.next_run_at {
            None => TenantOutcome::Drained,
            Some(at) if at > inner.clock.now() => TenantOutcome::Deferred(at),
            Some(_) => TenantOutcome::Unfinished,
        };
        Ok(())
    }
}

fn retry_delay(config: &DriverConfig) -> chrono::Duration {
    chrono::Duration::from_std(config.retry_delay).unwrap_or_else(|_| chrono::Duration::seconds(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TenantOutbox;
    use crate::DriverError;
    use async_trait::async_trait;
    use peer_outbox::{
        BoxId, EncryptedClientAuthToken, EncryptedKeyHeader, EncryptedTransferInstructionSet, FileSystemType,
        InternalDriveFileId, ManualClock, NewOutboxItem, OutboxError, OutboxQueue, OutboxStatus, Recipient,
        RedactedAccessControlList, SecurityGroup, SendContents, TargetDrive, TransitOptions,
    };
    use peer_transfer::BatchReport;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Clone, Copy)]
    enum Mode {
        Deliver,
        Defer(chrono::Duration),
        Fail,
    }

    /// Outbox over a real queue that resolves every batch the same way.
    struct ScriptedOutbox {
        queue: OutboxQueue,
        clock: ManualClock,
        mode: Mode,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl TenantOutbox for ScriptedOutbox {
        fn tenant(&self) -> &TenantId {
            self.queue.tenant()
        }

        async fn due_boxes(&self) -> DriverResult<Vec<BoxId>> {
            Ok(self.queue.due_boxes().await?)
        }

        async fn process_next(&self, box_id: BoxId, batch_size: usize) -> DriverResult<Option<BatchReport>> {
            let (items, lease) = self.queue.pop_batch(box_id, batch_size).await?;
            if items.is_empty() {
                self.queue.commit(lease).await?;
                return Ok(None);
            }
            let mut batch = BatchReport::default();
            match self.mode {
                Mode::Deliver if self.cancel.is_cancelled() => {
                    batch.rescheduled = self.queue.cancel(lease).await?;
                }
                Mode::Deliver => batch.delivered = self.queue.commit(lease).await?,
                Mode::Defer(by) => {
                    batch.rescheduled = self.queue.reschedule(lease, self.clock.now() + by).await?;
                }
                Mode::Fail => {
                    self.queue.cancel(lease).await?;
                    return Err(DriverError::Outbox(OutboxError::InvalidArgument("scripted failure".into())));
                }
            }
            Ok(Some(batch))
        }

        async fn status(&self) -> DriverResult<OutboxStatus> {
            Ok(self.queue.status().await?)
        }
    }

    struct ScriptedRegistry {
        db: AsyncDatabase,
        pending: PendingTenantIndex,
        clock: ManualClock,
        modes: Mutex<HashMap<TenantId, Mode>>,
    }

    #[async_trait]
    impl TenantRegistry for ScriptedRegistry {
        async fn outbox_for(
            &self,
            tenant: &TenantId,
            cancel: CancellationToken,
        ) -> DriverResult<Option<Arc<dyn TenantOutbox>>> {
            let Some(mode) = self.modes.lock().unwrap().get(tenant).copied() else {
                return Ok(None);
            };
            Ok(Some(Arc::new(ScriptedOutbox {
                queue: queue_for(&self.db, &self.pending, &self.clock, tenant),
                clock: self.clock.clone(),
                mode,
                cancel,
            })))
        }
    }

    struct Fixture {
        db: AsyncDatabase,
        pending: PendingTenantIndex,
        clock: ManualClock,
        registry: Arc<ScriptedRegistry>,
    }

    impl Fixture {
        async fn new() -> Self {
            let db = AsyncDatabase::open_in_memory().await.unwrap();
            // Whole seconds, so stored millisecond timestamps compare equal.
            let clock = ManualClock::new(DateTime::from_timestamp(1_790_000_000, 0).unwrap());
            let pending = PendingTenantIndex::new(db.clone(), Arc::new(clock.clone()));
            let registry = Arc::new(ScriptedRegistry {
                db: db.clone(),
                pending: pending.clone(),
                clock: clock.clone(),
                modes: Mutex::new(HashMap::new()),
            });
            Self {
                db,
                pending,
                clock,
                registry,
            }
        }

        fn serve(&self, tenant: &TenantId, mode: Mode) {
            self.registry.modes.lock().unwrap().insert(tenant.clone(), mode);
        }

        fn driver(&self, config: DriverConfig) -> OutboxDriver {
            OutboxDriver::new(
                self.db.clone(),
                self.pending.clone(),
                self.registry.clone(),
                Arc::new(self.clock.clone()),
                config,
            )
        }

        fn queue(&self, tenant: &TenantId) -> OutboxQueue {
            queue_for(&self.db, &self.pending, &self.clock, tenant)
        }

        async fn enqueue(&self, tenant: &TenantId, count: usize) {
            let drive_id = Uuid::new_v4();
            let items = (0..count).map(|_| new_item(drive_id)).collect();
            self.queue(tenant).enqueue_many(items).await.unwrap();
        }

        async fn signaled(&self) -> Vec<TenantId> {
            let (mut tenants, lease) = self.pending.pop_signaled_tenants(100).await.unwrap();
            self.pending.cancel(lease).await.unwrap();
            tenants.sort();
            tenants
        }
    }

    fn queue_for(db: &AsyncDatabase, pending: &PendingTenantIndex, clock: &ManualClock, tenant: &TenantId) -> OutboxQueue {
        OutboxQueue::new(tenant.clone(), db.clone(), pending.clone(), Arc::new(clock.clone()))
    }

    fn tenant(name: &str) -> TenantId {
        TenantId::new(name).unwrap()
    }

    fn new_item(drive_id: Uuid) -> NewOutboxItem {
        let recipient = Recipient::new("frodo.example").unwrap();
        NewOutboxItem::for_recipient(
            recipient.clone(),
            InternalDriveFileId::new(drive_id, Uuid::new_v4()).unwrap(),
            EncryptedTransferInstructionSet {
                target_drive: TargetDrive {
                    alias: Uuid::new_v4(),
                    drive_type: Uuid::new_v4(),
                },
                file_system_type: FileSystemType::Standard,
                content_sent: SendContents::all(),
                shared_secret_encrypted_key_header: EncryptedKeyHeader {
                    encryption_version: 1,
                    iv: vec![0; 16],
                    encrypted_aes_key: vec![0; 48],
                },
                access_control_list: RedactedAccessControlList {
                    required_security_group: SecurityGroup::Connected,
                },
                app_notification_options: None,
            },
            TransitOptions::to(vec![recipient]),
            EncryptedClientAuthToken::new(vec![7]),
        )
        .unwrap()
    }

    fn config() -> DriverConfig {
        DriverConfig {
            batch_size: 2,
            poll_interval: Duration::from_millis(10),
            ..DriverConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pass_drains_tenant_and_clears_signal() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        fx.serve(&sam, Mode::Deliver);
        fx.enqueue(&sam, 5).await;

        let report = fx.driver(config()).run_pass().await.unwrap();
        assert_eq!(report.tenants.len(), 1);
        assert_eq!(report.tenants[0].outcome, TenantOutcome::Drained);
        assert_eq!(report.tenants[0].batches, 3);
        assert_eq!(report.delivered(), 5);

        assert_eq!(fx.queue(&sam).status().await.unwrap().total, 0);
        assert!(fx.signaled().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_limit_leaves_tenant_armed() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        fx.serve(&sam, Mode::Deliver);
        fx.enqueue(&sam, 5).await;

        let driver = fx.driver(DriverConfig {
            max_batches_per_tenant_pass: 1,
            ..config()
        });
        let report = driver.run_pass().await.unwrap();
        assert_eq!(report.tenants[0].outcome, TenantOutcome::Unfinished);
        assert_eq!(report.delivered(), 2);
        assert_eq!(fx.signaled().await, vec![sam.clone()]);

        driver.run_pass().await.unwrap();
        let report = driver.run_pass().await.unwrap();
        assert_eq!(report.tenants[0].outcome, TenantOutcome::Drained);
        assert_eq!(fx.queue(&sam).status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_backed_off_items_defer_the_tenant() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        fx.serve(&sam, Mode::Defer(chrono::Duration::seconds(30)));
        fx.enqueue(&sam, 1).await;

        let expected = fx.clock.now() + chrono::Duration::seconds(30);
        let report = fx.driver(config()).run_pass().await.unwrap();
        assert_eq!(report.tenants[0].outcome, TenantOutcome::Deferred(expected));
        assert!(fx.signaled().await.is_empty());

        fx.clock.advance(chrono::Duration::seconds(30));
        assert_eq!(fx.signaled().await, vec![sam]);
    }

    #[tokio::test]
    async fn test_failed_tenant_waits_retry_delay() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        let frodo = tenant("frodo.example");
        fx.serve(&sam, Mode::Fail);
        fx.serve(&frodo, Mode::Deliver);
        fx.enqueue(&sam, 1).await;
        fx.enqueue(&frodo, 1).await;

        let driver = fx.driver(DriverConfig {
            retry_delay: Duration::from_secs(5),
            ..config()
        });
        let report = driver.run_pass().await.unwrap();
        assert_eq!(report.tenants.len(), 2);
        assert_eq!(report.count(|o| matches!(o, TenantOutcome::Failed(_))), 1);
        assert_eq!(report.count(|o| *o == TenantOutcome::Drained), 1);

        assert!(fx.signaled().await.is_empty());
        fx.clock.advance(chrono::Duration::seconds(5));
        assert_eq!(fx.signaled().await, vec![sam.clone()]);
        assert_eq!(fx.queue(&sam).status().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant_signal_is_dropped() {
        let fx = Fixture::new().await;
        fx.pending.mark_pending(&tenant("gone.example")).await.unwrap();

        let report = fx.driver(config()).run_pass().await.unwrap();
        assert_eq!(report.tenants[0].outcome, TenantOutcome::Drained);
        assert!(fx.signaled().await.is_empty());
    }

    #[tokio::test]
    async fn test_single_slot_pool_serves_every_tenant() {
        let fx = Fixture::new().await;
        let names = ["a.example", "b.example", "c.example"];
        for name in names {
            fx.serve(&tenant(name), Mode::Deliver);
            fx.enqueue(&tenant(name), 3).await;
        }

        let driver = fx.driver(DriverConfig {
            max_concurrent_tenants: 1,
            ..config()
        });
        let report = driver.run_pass().await.unwrap();
        assert_eq!(report.tenants.len(), 3);
        assert_eq!(report.delivered(), 9);
        assert!(fx.signaled().await.is_empty());
    }

    #[tokio::test]
    async fn test_process_tenant_ignores_index() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        fx.serve(&sam, Mode::Deliver);
        fx.enqueue(&sam, 3).await;

        let report = fx.driver(config()).process_tenant(&sam, 10).await;
        assert_eq!(report.outcome, TenantOutcome::Drained);
        assert_eq!(report.batches, 1);
        assert_eq!(report.delivered, 3);
        // The signal stays until a pass sees the empty queue.
        assert_eq!(fx.signaled().await, vec![sam]);
    }

    #[tokio::test]
    async fn test_reclaim_releases_stale_leases() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        fx.enqueue(&sam, 1).await;

        let queue = fx.queue(&sam);
        let box_id = queue.due_boxes().await.unwrap()[0];
        let (items, lease) = queue.pop_batch(box_id, 10).await.unwrap();
        assert_eq!(items.len(), 1);

        let driver = fx.driver(DriverConfig {
            lease_timeout: Duration::from_secs(60),
            ..config()
        });
        assert!(driver.reclaim_expired().await.unwrap().is_empty());

        fx.clock.advance(chrono::Duration::seconds(61));
        let report = driver.reclaim_expired().await.unwrap();
        assert_eq!(report.outbox_rows, 1);
        assert_eq!(report.tenants, vec![sam.clone()]);
        assert!(queue.commit(lease).await.is_err());

        fx.serve(&sam, Mode::Deliver);
        let report = driver.run_pass().await.unwrap();
        assert_eq!(report.delivered(), 1);
    }

    #[tokio::test]
    async fn test_started_driver_delivers_and_stops_on_shutdown() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        fx.serve(&sam, Mode::Deliver);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = fx.driver(config()).start(shutdown_rx);

        fx.enqueue(&sam, 4).await;
        let queue = fx.queue(&sam);
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.status().await.unwrap().total > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_driver_leaves_tenants_armed() {
        let fx = Fixture::new().await;
        let sam = tenant("sam.example");
        fx.serve(&sam, Mode::Deliver);
        fx.enqueue(&sam, 1).await;

        let driver = fx.driver(config());
        driver.stop();
        let report = driver.run_pass().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(fx.signaled().await, vec![sam.clone()]);
        assert_eq!(fx.queue(&sam).status().await.unwrap().total, 1);
    }
}
