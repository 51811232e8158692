//! Latest delivery status per (file, recipient).
//!
//! Delivery failures are never returned to the caller that asked for the
//! send; this table is where they surface instead.

use crate::clock::Clock;
use crate::ids::{InternalDriveFileId, Recipient, TenantId};
use crate::result::{LatestProblem, OutboxProcessingResult, TransferStatus};
use crate::OutboxResult;
use chrono::{DateTime, Utc};
use outbox_database::{queries, AsyncDatabase, TransferHistoryRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// What a caller sees for one recipient of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientTransferStatus {
    pub status: TransferStatus,
    pub latest_problem: Option<LatestProblem>,
    /// Version tag of the header most recently accepted by the recipient.
    pub delivered_version_tag: Option<Uuid>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TransferHistory {
    tenant: TenantId,
    db: AsyncDatabase,
    clock: Arc<dyn Clock>,
}

impl TransferHistory {
    pub fn new(tenant: TenantId, db: AsyncDatabase, clock: Arc<dyn Clock>) -> Self {
        Self { tenant, db, clock }
    }

    /// Mark each recipient of `file` as enqueued.
    pub async fn record_enqueued(&self, file: &InternalDriveFileId, recipients: &[Recipient]) -> OutboxResult<()> {
        let now = self.clock.now();
        let rows: Vec<TransferHistoryRow> = recipients
            .iter()
            .map(|recipient| self.row(file, recipient, TransferStatus::Enqueued, None, None, now))
            .collect();

        self.db
            .call(move |conn| {
                for row in &rows {
                    queries::upsert_transfer_history(conn, row)?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Record the outcome of a delivery attempt.
    pub async fn record_result(&self, outcome: &OutboxProcessingResult) -> OutboxResult<()> {
        let status = TransferStatus::from_result(outcome.result, outcome.response_code);
        let problem = LatestProblem::for_result(outcome.result);
        let delivered = if outcome.result.is_success() {
            outcome.version_tag
        } else {
            None
        };

        let row = self.row(&outcome.file, &outcome.recipient, status, problem, delivered, outcome.at);
        self.db
            .call(move |conn| queries::upsert_transfer_history(conn, &row))
            .await?;
        Ok(())
    }

    /// Latest status of every recipient that `file` was ever sent to.
    pub async fn recipient_statuses(
        &self,
        file: &InternalDriveFileId,
    ) -> OutboxResult<BTreeMap<Recipient, RecipientTransferStatus>> {
        let tenant_id = self.tenant.as_str().to_string();
        let drive_id = file.drive_id.to_string();
        let file_id = file.file_id.to_string();
        let rows = self
            .db
            .call(move |conn| queries::list_transfer_history(conn, &tenant_id, &drive_id, &file_id))
            .await?;

        let mut statuses = BTreeMap::new();
        for row in rows {
            let recipient = match Recipient::new(&row.recipient) {
                Ok(recipient) => recipient,
                Err(e) => {
                    warn!(recipient = %row.recipient, error = %e, "Skipping invalid history row");
                    continue;
                }
            };
            statuses.insert(
                recipient,
                RecipientTransferStatus {
                    status: TransferStatus::from_str(&row.latest_status),
                    latest_problem: row.latest_problem.as_deref().and_then(LatestProblem::from_str),
                    delivered_version_tag: row
                        .delivered_version_tag
                        .as_deref()
                        .and_then(|tag| Uuid::parse_str(tag).ok()),
                    last_updated: row.last_updated,
                },
            );
        }
        Ok(statuses)
    }

    fn row(
        &self,
        file: &InternalDriveFileId,
        recipient: &Recipient,
        status: TransferStatus,
        problem: Option<LatestProblem>,
        delivered_version_tag: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> TransferHistoryRow {
        TransferHistoryRow {
            tenant_id: self.tenant.as_str().to_string(),
            drive_id: file.drive_id.to_string(),
            file_id: file.file_id.to_string(),
            recipient: recipient.as_str().to_string(),
            latest_status: status.as_str().to_string(),
            latest_problem: problem.map(|p| p.as_str().to_string()),
            delivered_version_tag: delivered_version_tag.map(|tag| tag.to_string()),
            last_updated: at,
        }
    }
}
