//! The delivery worker: turns a leased batch into classified outcomes and
//! resolves the lease once.
//!
//! ## Per item
//!
//! 1. Re-read the header from storage. A missing header is terminal.
//! 2. Re-check the recipient against the current ACL.
//! 3. Re-check the distribution flag.
//! 4. Build the multipart body (payload streams are opened, not read).
//! 5. Unseal the client token, transmit, and drop the token.
//! 6. Classify the outcome.
//!
//! ## Per batch
//!
//! Items of one recipient run in batch order; distinct recipients run
//! concurrently, up to `recipient_concurrency`. After every item is done
//! the lease is resolved in a single call, history is recorded, events are
//! broadcast, and transient files no row references any more are deleted.

use crate::acl::AclAuthorizer;
use crate::classify::{classify, Classification};
use crate::crypto::TransferCrypto;
use crate::drive::DriveStorage;
use crate::error::DeliveryResult;
use crate::retry::RetryPolicy;
use crate::transport::{PeerTransport, TransmitOutcome};
use crate::wire::build_transfer_body;
use futures_util::{stream, StreamExt};
use peer_outbox::{
    Attempt, BoxId, Clock, Disposition, InternalDriveFileId, Lease, LeaseResolution, OutboxItem,
    OutboxProcessingResult, OutboxQueue, Recipient, RescheduledItem, TenantId, TransferHistory, TransferResult,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Published after a batch is resolved.
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    Delivered {
        tenant: TenantId,
        result: OutboxProcessingResult,
    },
    Failed {
        tenant: TenantId,
        result: OutboxProcessingResult,
        disposition: Disposition,
    },
}

/// Collaborators shared by every tenant's worker.
#[derive(Clone)]
pub struct DeliveryServices {
    pub storage: Arc<dyn DriveStorage>,
    pub authorizer: Arc<dyn AclAuthorizer>,
    pub crypto: Arc<dyn TransferCrypto>,
    pub transport: Arc<dyn PeerTransport>,
    pub clock: Arc<dyn Clock>,
    events: broadcast::Sender<DeliveryEvent>,
}

impl DeliveryServices {
    pub fn new(
        storage: Arc<dyn DriveStorage>,
        authorizer: Arc<dyn AclAuthorizer>,
        crypto: Arc<dyn TransferCrypto>,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage,
            authorizer,
            crypto,
            transport,
            clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub recipient_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            recipient_concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Summary of one processed batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub delivered: usize,
    pub rescheduled: usize,
    /// Committed without delivery: terminal failures.
    pub dropped: usize,
    pub transient_files_deleted: usize,
    pub results: Vec<OutboxProcessingResult>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.results.len()
    }
}

/// Delivers one tenant's outbox.
#[derive(Clone)]
pub struct DeliveryWorker {
    queue: OutboxQueue,
    history: TransferHistory,
    services: DeliveryServices,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl DeliveryWorker {
    pub fn new(queue: OutboxQueue, history: TransferHistory, services: DeliveryServices, config: WorkerConfig) -> Self {
        Self {
            queue,
            history,
            services,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// In-flight transmissions end as canceled once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tenant(&self) -> &TenantId {
        self.queue.tenant()
    }

    pub fn queue(&self) -> &OutboxQueue {
        &self.queue
    }

    /// Pop and process one batch of `box_id`. `None` when the box had
    /// nothing visible.
    pub async fn process_next(&self, box_id: BoxId, batch_size: usize) -> DeliveryResult<Option<BatchReport>> {
        let (items, lease) = self.queue.pop_batch(box_id, batch_size).await?;
        if items.is_empty() {
            self.queue.commit(lease).await?;
            return Ok(None);
        }
        self.process_batch(items, lease).await.map(Some)
    }

    /// Process a leased batch and resolve `lease`.
    pub async fn process_batch(&self, items: Vec<OutboxItem>, lease: Lease) -> DeliveryResult<BatchReport> {
        let concurrency = self.config.recipient_concurrency.max(1);
        let chains = group_by_recipient(items);

        let outcomes: Vec<(OutboxItem, OutboxProcessingResult)> = stream::iter(chains)
            .map(|chain| async move {
                let mut done = Vec::with_capacity(chain.len());
                for item in chain {
                    let result = self.deliver(&item).await;
                    done.push((item, result));
                }
                done
            })
            .buffer_unordered(concurrency)
            .flat_map(stream::iter)
            .collect()
            .await;

        let now = self.services.clock.now();
        let mut resolution = LeaseResolution::default();
        let mut report = BatchReport::default();
        for (item, result) in &outcomes {
            match result.result.disposition() {
                Disposition::Commit => {
                    resolution.committed.push(item.id);
                    if result.result.is_success() {
                        report.delivered += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
                Disposition::Reschedule => {
                    let mut attempts = item.attempts.clone();
                    attempts.push(Attempt {
                        result: result.result,
                        at: result.at,
                        http_status: result.http_status,
                        response_code: result.response_code,
                    });
                    resolution.rescheduled.push(RescheduledItem {
                        item: item.id,
                        not_before: self.config.retry.next_run_at(now, attempts.len()),
                        attempts,
                    });
                    report.rescheduled += 1;
                }
            }
        }

        self.queue.resolve(lease, resolution).await?;

        for (item, result) in &outcomes {
            self.publish(item, result).await;
        }

        report.transient_files_deleted = self.delete_serviced_transient_files(&outcomes).await?;
        report.results = outcomes.into_iter().map(|(_, result)| result).collect();
        Ok(report)
    }

    async fn deliver(&self, item: &OutboxItem) -> OutboxProcessingResult {
        let (classification, version_tag) = self.attempt(item).await;
        OutboxProcessingResult {
            item: item.id,
            file: item.file,
            recipient: item.recipient.clone(),
            http_status: classification.http_status,
            response_code: classification.response_code,
            result: classification.result,
            version_tag,
            at: self.services.clock.now(),
        }
    }

    async fn attempt(&self, item: &OutboxItem) -> (Classification, Option<Uuid>) {
        let services = &self.services;

        let header = match services.storage.get_server_file_header(&item.file).await {
            Ok(Some(header)) => header,
            Ok(None) => return (local(TransferResult::SourceFileMissing), None),
            Err(e) => {
                warn!(tenant = %self.tenant(), file = %item.file, error = %e, "Failed to read file header");
                return (local(TransferResult::LocalTransientFailure), None);
            }
        };
        let version_tag = Some(header.version_tag());

        match services
            .authorizer
            .identity_has_permission(&item.recipient, &header.server_metadata.access_control_list)
            .await
        {
            Ok(true) => {}
            Ok(false) => return (local(TransferResult::RecipientDoesNotHavePermissionToFileAcl), version_tag),
            Err(e) => {
                warn!(tenant = %self.tenant(), recipient = %item.recipient, error = %e, "ACL check failed");
                return (local(TransferResult::LocalTransientFailure), version_tag);
            }
        }

        if !header.allows_distribution() {
            return (local(TransferResult::FileDoesNotAllowDistribution), version_tag);
        }

        let body = match build_transfer_body(
            services.storage.as_ref(),
            &item.file,
            &header,
            &item.instructions,
            &item.options,
        )
        .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(tenant = %self.tenant(), file = %item.file, error = %e, "Failed to build transfer body");
                return (local(TransferResult::LocalTransientFailure), version_tag);
            }
        };

        let outcome = {
            let token = match services.crypto.unwrap_client_auth_token(&item.client_auth_token) {
                Ok(token) => token,
                Err(e) => {
                    warn!(tenant = %self.tenant(), recipient = %item.recipient, error = %e, "Failed to unseal client token");
                    return (local(TransferResult::LocalTransientFailure), version_tag);
                }
            };
            tokio::select! {
                outcome = services.transport.transmit(&item.recipient, &token, body) => outcome,
                _ = self.cancel.cancelled() => TransmitOutcome::Canceled,
            }
            // `token` is wiped here, whatever the outcome.
        };

        if let TransmitOutcome::Failed(reason) = &outcome {
            warn!(tenant = %self.tenant(), recipient = %item.recipient, reason = %reason, "Transfer failed");
        }
        (classify(&outcome), version_tag)
    }

    async fn publish(&self, item: &OutboxItem, result: &OutboxProcessingResult) {
        let tenant = self.tenant().clone();
        let disposition = result.result.disposition();

        if result.result.is_success() {
            info!(
                tenant = %tenant,
                recipient = %item.recipient,
                file = %item.file,
                code = ?result.response_code,
                "Delivered file"
            );
        } else {
            warn!(
                tenant = %tenant,
                recipient = %item.recipient,
                file = %item.file,
                result = %result.result,
                http_status = ?result.http_status,
                attempts = item.attempts.len() + 1,
                disposition = ?disposition,
                "Delivery did not succeed"
            );
        }

        if let Err(e) = self.history.record_result(result).await {
            warn!(tenant = %tenant, file = %item.file, error = %e, "Failed to record transfer history");
        }

        let event = if result.result.is_success() {
            DeliveryEvent::Delivered {
                tenant,
                result: result.clone(),
            }
        } else {
            DeliveryEvent::Failed {
                tenant,
                result: result.clone(),
                disposition,
            }
        };
        // No subscribers is fine.
        let _ = self.services.events.send(event);
    }

    /// Delete committed transient files once no row of any recipient
    /// references them.
    async fn delete_serviced_transient_files(
        &self,
        outcomes: &[(OutboxItem, OutboxProcessingResult)],
    ) -> DeliveryResult<usize> {
        let mut candidates: Vec<InternalDriveFileId> = Vec::new();
        for (item, result) in outcomes {
            if item.is_transient_file
                && result.result.disposition() == Disposition::Commit
                && !candidates.contains(&item.file)
            {
                candidates.push(item.file);
            }
        }

        let mut deleted = 0;
        for file in candidates {
            let remaining = self.queue.references_file(&file).await?;
            if remaining > 0 {
                debug!(tenant = %self.tenant(), file = %file, remaining, "Transient file still referenced");
                continue;
            }
            match self.services.storage.hard_delete_file(&file).await {
                Ok(()) => {
                    info!(tenant = %self.tenant(), file = %file, "Deleted transient file");
                    deleted += 1;
                }
                Err(e) => warn!(tenant = %self.tenant(), file = %file, error = %e, "Failed to delete transient file"),
            }
        }
        Ok(deleted)
    }
}

fn local(result: TransferResult) -> Classification {
    Classification {
        result,
        http_status: None,
        response_code: None,
    }
}

/// Split a batch into per-recipient chains, keeping batch order inside
/// each chain and first-appearance order across chains.
fn group_by_recipient(items: Vec<OutboxItem>) -> Vec<Vec<OutboxItem>> {
    let mut chains: Vec<(Recipient, Vec<OutboxItem>)> = Vec::new();
    for item in items {
        match chains.iter_mut().find(|(recipient, _)| *recipient == item.recipient) {
            Some((_, chain)) => chain.push(item),
            None => chains.push((item.recipient.clone(), vec![item])),
        }
    }
    chains.into_iter().map(|(_, chain)| chain).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{instructions, Harness, Script};
    use crate::wire::PartKind;
    use chrono::Duration;
    use peer_outbox::{EncryptedClientAuthToken, NewOutboxItem, OutboxItemId, SendContents, TransferStatus, TransitOptions};

    async fn enqueue_with(h: &Harness, file: InternalDriveFileId, recipient: &Recipient, options: TransitOptions) -> OutboxItemId {
        let token = EncryptedClientAuthToken::new(format!("token-for-{}", recipient).into_bytes());
        h.queue
            .enqueue(NewOutboxItem::for_recipient(recipient.clone(), file, instructions(&options), options, token).unwrap())
            .await
            .unwrap()
    }

    async fn enqueue(h: &Harness, file: InternalDriveFileId, recipient: &Recipient, transient: bool) -> OutboxItemId {
        let mut options = TransitOptions::to(vec![recipient.clone()]);
        options.is_transient_file = transient;
        enqueue_with(h, file, recipient, options).await
    }

    fn worker(h: &Harness) -> DeliveryWorker {
        DeliveryWorker::new(h.queue.clone(), h.history.clone(), h.services.clone(), WorkerConfig::default())
    }

    fn box_of(file: &InternalDriveFileId) -> BoxId {
        BoxId::for_drive(file.drive_id).unwrap()
    }

    fn frodo() -> Recipient {
        Recipient::new("frodo.example").unwrap()
    }

    fn merry() -> Recipient {
        Recipient::new("merry.example").unwrap()
    }

    #[tokio::test]
    async fn test_success_sends_parts_in_order_and_commits() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), false).await;

        let report = worker(&h).process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.processed(), 1);
        assert_eq!(report.results[0].result, TransferResult::Success);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, b"token-for-frodo.example".to_vec());

        let kinds: Vec<PartKind> = sent[0].parts.iter().map(|p| p.0).collect();
        assert_eq!(
            kinds,
            vec![PartKind::TransferKeyHeader, PartKind::Metadata, PartKind::Payload, PartKind::Thumbnail]
        );
        let (_, name, content_type, bytes) = &sent[0].parts[2];
        assert_eq!(name, "pk1");
        assert_eq!(content_type, "application/unknown");
        assert_eq!(bytes.as_ref(), b"hello world");
        let (_, name, content_type, bytes) = &sent[0].parts[3];
        assert_eq!(name, "pk1:200:100");
        assert_eq!(content_type, "image/webp");
        assert_eq!(bytes.as_ref(), b"thumb");

        let metadata = String::from_utf8(sent[0].parts[1].3.to_vec()).unwrap();
        assert!(metadata.contains("\"content\":\"hello\""));
        assert!(!metadata.contains("local only"));

        assert_eq!(h.queue.status().await.unwrap().total, 0);
        let statuses = h.history.recipient_statuses(&file).await.unwrap();
        assert_eq!(statuses[&frodo()].status, TransferStatus::DeliveredToInbox);
    }

    #[tokio::test]
    async fn test_server_error_reschedules_and_keeps_transient_file() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), true).await;
        h.transport.reply_status(&frodo(), 500);

        let worker = worker(&h);
        let report = worker.process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.transient_files_deleted, 0);
        assert!(h.storage.contains(&file));
        assert_eq!(h.queue.status().await.unwrap().total, 1);

        h.clock.advance(Duration::milliseconds(4999));
        let (items, lease) = h.queue.pop_batch(box_of(&file), 10).await.unwrap();
        assert!(items.is_empty());
        h.queue.commit(lease).await.unwrap();

        h.clock.advance(Duration::milliseconds(1));
        let (items, lease) = h.queue.pop_batch(box_of(&file), 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempts.len(), 1);
        assert_eq!(items[0].attempts[0].result, TransferResult::RecipientServerError);
        assert_eq!(items[0].attempts[0].http_status, Some(500));
        h.queue.cancel(lease).await.unwrap();

        let statuses = h.history.recipient_statuses(&file).await.unwrap();
        assert_eq!(statuses[&frodo()].status, TransferStatus::PendingRetry);
    }

    #[tokio::test]
    async fn test_access_denied_commits_and_deletes_transient_file() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), true).await;
        h.transport.reply_status(&frodo(), 403);

        let report = worker(&h).process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.results[0].result, TransferResult::RecipientServerReturnedAccessDenied);
        assert_eq!(report.transient_files_deleted, 1);
        assert_eq!(h.storage.deleted(), vec![file]);
        assert_eq!(h.queue.status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_revoked_acl_commits_without_transmitting() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), false).await;
        h.acl.deny(&frodo());

        let report = worker(&h).process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.results[0].result, TransferResult::RecipientDoesNotHavePermissionToFileAcl);
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.queue.status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_disabled_distribution_commits_without_transmitting() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), false).await;
        h.storage.set_allow_distribution(&file, false);

        let report = worker(&h).process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.results[0].result, TransferResult::FileDoesNotAllowDistribution);
        assert!(h.transport.sent().is_empty());

        let statuses = h.history.recipient_statuses(&file).await.unwrap();
        assert_eq!(statuses[&frodo()].status, TransferStatus::FileDoesNotAllowDistribution);
    }

    #[tokio::test]
    async fn test_missing_source_file_is_terminal() {
        let h = Harness::new().await;
        let file = InternalDriveFileId::new(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        enqueue(&h, file, &frodo(), false).await;

        let report = worker(&h).process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.results[0].result, TransferResult::SourceFileMissing);
        assert_eq!(report.results[0].version_tag, None);
        assert_eq!(h.queue.status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_transient_file_waits_for_every_recipient() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), true).await;
        enqueue(&h, file, &merry(), true).await;
        h.transport.reply_status(&merry(), 503);

        let worker = worker(&h);
        let report = worker.process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.rescheduled, 1);
        assert!(h.storage.deleted().is_empty());
        assert!(h.storage.contains(&file));

        h.clock.advance(Duration::seconds(5));
        let report = worker.process_next(box_of(&file), 10).await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.transient_files_deleted, 1);
        assert_eq!(h.storage.deleted(), vec![file]);
    }

    #[tokio::test]
    async fn test_header_only_sync_sends_two_parts() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        let mut options = TransitOptions::to(vec![frodo()]);
        options.send_contents = SendContents::header_only();
        enqueue_with(&h, file, &frodo(), options).await;

        worker(&h).process_next(box_of(&file), 10).await.unwrap().unwrap();
        let sent = h.transport.sent();
        let kinds: Vec<PartKind> = sent[0].parts.iter().map(|p| p.0).collect();
        assert_eq!(kinds, vec![PartKind::TransferKeyHeader, PartKind::Metadata]);
    }

    #[tokio::test]
    async fn test_canceled_transmission_is_rescheduled() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), false).await;
        h.transport.script(&frodo(), Script::Hang);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = worker(&h)
            .with_cancellation(cancel)
            .process_next(box_of(&file), 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.results[0].result, TransferResult::RecipientServerNotResponding);
        assert_eq!(report.rescheduled, 1);
        assert_eq!(h.queue.status().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_items_of_one_recipient_go_out_in_batch_order() {
        let h = Harness::new().await;
        let drive = Uuid::new_v4();
        let mut versions = Vec::new();
        for _ in 0..3 {
            let file = InternalDriveFileId::new(drive, Uuid::new_v4()).unwrap();
            versions.push(h.storage.add_file(file, true).version_tag());
            enqueue(&h, file, &frodo(), false).await;
            enqueue(&h, file, &merry(), false).await;
        }

        let report = worker(&h)
            .process_next(BoxId::for_drive(drive).unwrap(), 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.delivered, 6);

        let sent = h.transport.sent();
        for recipient in [frodo(), merry()] {
            let order: Vec<Uuid> = sent
                .iter()
                .filter(|t| t.recipient == recipient)
                .map(|t| {
                    let json: serde_json::Value = serde_json::from_slice(&t.parts[1].3).unwrap();
                    json["versionTag"].as_str().unwrap().parse().unwrap()
                })
                .collect();
            assert_eq!(order, versions);
        }
    }

    #[tokio::test]
    async fn test_resolution_publishes_events() {
        let h = Harness::new().await;
        let file = h.new_file(true);
        enqueue(&h, file, &frodo(), false).await;
        enqueue(&h, file, &merry(), false).await;
        h.transport.reply_status(&merry(), 500);

        let mut events = h.services.subscribe();
        worker(&h).process_next(box_of(&file), 10).await.unwrap().unwrap();

        let mut delivered = 0;
        let mut failed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                DeliveryEvent::Delivered { result, .. } => {
                    assert_eq!(result.recipient, frodo());
                    delivered += 1;
                }
                DeliveryEvent::Failed { result, disposition, .. } => {
                    assert_eq!(result.recipient, merry());
                    assert_eq!(disposition, Disposition::Reschedule);
                    failed += 1;
                }
            }
        }
        assert_eq!((delivered, failed), (1, 1));
    }
}
