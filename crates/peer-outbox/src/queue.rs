//! Per-tenant outbox queue.

use crate::clock::Clock;
use crate::ids::{BoxId, InternalDriveFileId, OutboxItemId, Recipient, TenantId};
use crate::item::{Attempt, EncryptedClientAuthToken, NewOutboxItem, OutboxItem};
use crate::lease::{Lease, LeaseId, LeaseResolution};
use crate::pending::PendingTenantIndex;
use crate::{OutboxError, OutboxResult};
use chrono::{DateTime, Utc};
use outbox_database::{queries, AsyncDatabase, LeaseResolutionCounts, NewOutboxRow, OutboxRow, RowReschedule};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Aggregate state of one tenant's outbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboxStatus {
    pub total: i64,
    pub leased: i64,
    /// When the earliest unleased item becomes visible.
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Persisted, lease-based queue of deliveries for one tenant.
///
/// Rows are partitioned by box and popped by priority, then insertion
/// time. Popping stamps the rows with a lease; until the lease is resolved
/// (or reclaimed after expiry) no other pop can see them.
#[derive(Clone)]
pub struct OutboxQueue {
    tenant: TenantId,
    db: AsyncDatabase,
    pending: PendingTenantIndex,
    clock: Arc<dyn Clock>,
}

impl OutboxQueue {
    pub fn new(tenant: TenantId, db: AsyncDatabase, pending: PendingTenantIndex, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenant,
            db,
            pending,
            clock,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Enqueue one item and signal the tenant.
    pub async fn enqueue(&self, item: NewOutboxItem) -> OutboxResult<OutboxItemId> {
        let ids = self.enqueue_many(vec![item]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| OutboxError::InvalidArgument("enqueue produced no row".to_string()))
    }

    /// Enqueue items in one transaction and signal the tenant once.
    ///
    /// Duplicate (box, recipient, file) rows are allowed; the worker
    /// re-reads the file at delivery time, so the newest state wins.
    pub async fn enqueue_many(&self, items: Vec<NewOutboxItem>) -> OutboxResult<Vec<OutboxItemId>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity(items.len());
        for item in &items {
            rows.push(NewOutboxRow {
                tenant_id: self.tenant.as_str().to_string(),
                box_id: item.box_id.to_string(),
                recipient: item.recipient.as_str().to_string(),
                drive_id: item.file.drive_id.to_string(),
                file_id: item.file.file_id.to_string(),
                priority: item.priority,
                is_transient_file: item.is_transient_file,
                transfer_instructions: serde_json::to_string(&item.instructions)?,
                transit_options: serde_json::to_string(&item.options)?,
                client_auth_token: item.client_auth_token.as_bytes().to_vec(),
            });
        }

        let now = self.clock.now();
        let ids = self
            .db
            .call(move |conn| queries::insert_outbox_rows(conn, &rows, now))
            .await?;

        self.pending.mark_pending(&self.tenant).await?;

        info!(tenant = %self.tenant, count = ids.len(), "Enqueued outbox items");
        Ok(ids.into_iter().map(OutboxItemId).collect())
    }

    /// Lease up to `max_count` visible items of `box_id`.
    ///
    /// An empty box yields no items and an empty lease whose resolution is
    /// a no-op.
    pub async fn pop_batch(&self, box_id: BoxId, max_count: usize) -> OutboxResult<(Vec<OutboxItem>, Lease)> {
        if max_count == 0 {
            return Err(OutboxError::InvalidArgument("max_count must be positive".to_string()));
        }

        let lease_id = LeaseId::generate();
        let lease_key = lease_id.as_str().to_string();
        let tenant_id = self.tenant.as_str().to_string();
        let box_key = box_id.to_string();
        let now = self.clock.now();

        let rows = self
            .db
            .call(move |conn| queries::pop_outbox_batch(conn, &tenant_id, &box_key, max_count, &lease_key, now))
            .await?;

        let ids: Vec<OutboxItemId> = rows.iter().map(|r| OutboxItemId(r.row_id)).collect();
        let lease = Lease::new(lease_id, self.tenant.clone(), box_id, ids, now);

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(self.decode_row(row)?);
        }

        if !items.is_empty() {
            debug!(tenant = %self.tenant, box_id = %box_id, lease_id = %lease.id(), count = items.len(), "Popped outbox batch");
        }
        Ok((items, lease))
    }

    /// Permanently delete every row of the lease.
    pub async fn commit(&self, lease: Lease) -> OutboxResult<usize> {
        let committed = lease.items().to_vec();
        let counts = self
            .resolve(
                lease,
                LeaseResolution {
                    committed,
                    rescheduled: Vec::new(),
                },
            )
            .await?;
        Ok(counts.committed)
    }

    /// Return every row of the lease, visible again once `not_before` passes.
    pub async fn reschedule(&self, lease: Lease, not_before: DateTime<Utc>) -> OutboxResult<usize> {
        let rescheduled: Vec<RowReschedule> = lease
            .items()
            .iter()
            .map(|id| RowReschedule {
                row_id: id.0,
                next_run_at: not_before,
                attempts: None,
            })
            .collect();
        let counts = self.resolve_rows(lease, Vec::new(), rescheduled).await?;
        Ok(counts.rescheduled)
    }

    /// Return every row of the lease to the queue immediately.
    pub async fn cancel(&self, lease: Lease) -> OutboxResult<usize> {
        let counts = self.resolve(lease, LeaseResolution::default()).await?;
        Ok(counts.released)
    }

    /// Resolve the rows of a lease individually, in one transaction.
    pub async fn resolve(&self, lease: Lease, resolution: LeaseResolution) -> OutboxResult<LeaseResolutionCounts> {
        for id in resolution
            .committed
            .iter()
            .chain(resolution.rescheduled.iter().map(|r| &r.item))
        {
            if !lease.covers(*id) {
                error!(lease_id = %lease.id(), item = %id, "Resolution names an item outside the lease");
                return Err(OutboxError::LeaseMismatch {
                    lease_id: lease.id().to_string(),
                    item: id.0,
                });
            }
        }

        let mut rescheduled = Vec::with_capacity(resolution.rescheduled.len());
        for item in &resolution.rescheduled {
            rescheduled.push(RowReschedule {
                row_id: item.item.0,
                next_run_at: item.not_before,
                attempts: Some(encode_attempts(&item.attempts)?),
            });
        }
        let committed = resolution.committed.iter().map(|id| id.0).collect();

        self.resolve_rows(lease, committed, rescheduled).await
    }

    async fn resolve_rows(
        &self,
        mut lease: Lease,
        committed: Vec<i64>,
        rescheduled: Vec<RowReschedule>,
    ) -> OutboxResult<LeaseResolutionCounts> {
        lease.mark_resolved();
        if lease.is_empty() {
            return Ok(LeaseResolutionCounts::default());
        }

        let lease_key = lease.id().as_str().to_string();
        let held_rows = lease.len();
        let now = self.clock.now();
        let outcome = self
            .db
            .call(move |conn| queries::resolve_leased_rows(conn, &lease_key, held_rows, &committed, &rescheduled, now))
            .await?;

        match outcome {
            Some(counts) => {
                debug!(
                    tenant = %self.tenant,
                    lease_id = %lease.id(),
                    committed = counts.committed,
                    rescheduled = counts.rescheduled,
                    released = counts.released,
                    "Resolved outbox lease"
                );
                Ok(counts)
            }
            None => {
                error!(
                    tenant = %self.tenant,
                    lease_id = %lease.id(),
                    expected = held_rows,
                    "Outbox lease no longer holds its rows"
                );
                Err(OutboxError::LeaseNotHeld {
                    lease_id: lease.id().to_string(),
                    expected: held_rows,
                })
            }
        }
    }

    /// Drop queued, not yet leased deliveries of `file` to `recipient`.
    pub async fn remove(&self, recipient: &Recipient, file: &InternalDriveFileId) -> OutboxResult<usize> {
        let tenant_id = self.tenant.as_str().to_string();
        let recipient_key = recipient.as_str().to_string();
        let drive_id = file.drive_id.to_string();
        let file_id = file.file_id.to_string();

        let removed = self
            .db
            .call(move |conn| queries::delete_unleased_rows(conn, &tenant_id, &recipient_key, &drive_id, &file_id))
            .await?;

        if removed > 0 {
            info!(tenant = %self.tenant, recipient = %recipient, file = %file, count = removed, "Removed outbox items");
        }
        Ok(removed)
    }

    /// Rows of any recipient, leased or not, still referencing `file`.
    pub async fn references_file(&self, file: &InternalDriveFileId) -> OutboxResult<usize> {
        let tenant_id = self.tenant.as_str().to_string();
        let drive_id = file.drive_id.to_string();
        let file_id = file.file_id.to_string();
        let count = self
            .db
            .call(move |conn| queries::count_rows_referencing_file(conn, &tenant_id, &drive_id, &file_id))
            .await?;
        Ok(count)
    }

    pub async fn status(&self) -> OutboxResult<OutboxStatus> {
        let tenant_id = self.tenant.as_str().to_string();
        let counts = self.db.call(move |conn| queries::get_outbox_counts(conn, &tenant_id)).await?;
        Ok(OutboxStatus {
            total: counts.total,
            leased: counts.leased,
            next_run_at: counts.next_run_at,
        })
    }

    /// Boxes with at least one visible item, most urgent first.
    pub async fn due_boxes(&self) -> OutboxResult<Vec<BoxId>> {
        let tenant_id = self.tenant.as_str().to_string();
        let now = self.clock.now();
        let raw = self.db.call(move |conn| queries::list_due_boxes(conn, &tenant_id, now)).await?;
        raw.iter().map(|b| b.parse()).collect()
    }

    fn decode_row(&self, row: OutboxRow) -> OutboxResult<OutboxItem> {
        let corrupt = |reason: String| OutboxError::CorruptRow {
            row_id: row.row_id,
            reason,
        };

        let file = InternalDriveFileId::from_columns(&row.drive_id, &row.file_id)
            .ok_or_else(|| corrupt("invalid file id".to_string()))?;
        let box_id: BoxId = row.box_id.parse().map_err(|e: OutboxError| corrupt(e.to_string()))?;
        let recipient = Recipient::new(&row.recipient).map_err(|e| corrupt(e.to_string()))?;
        let instructions =
            serde_json::from_str(&row.transfer_instructions).map_err(|e| corrupt(format!("instructions: {e}")))?;
        let options = serde_json::from_str(&row.transit_options).map_err(|e| corrupt(format!("options: {e}")))?;
        let attempts: Vec<Attempt> =
            serde_json::from_str(&row.attempts).map_err(|e| corrupt(format!("attempts: {e}")))?;

        Ok(OutboxItem {
            id: OutboxItemId(row.row_id),
            tenant: self.tenant.clone(),
            box_id,
            recipient,
            file,
            priority: row.priority,
            added_at: row.added_at,
            lease_count: row.lease_count,
            is_transient_file: row.is_transient_file,
            instructions,
            options,
            client_auth_token: EncryptedClientAuthToken::new(row.client_auth_token),
            attempts,
        })
    }
}

fn encode_attempts(attempts: &[Attempt]) -> OutboxResult<String> {
    Ok(serde_json::to_string(attempts)?)
}
