//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter and is meant
//! to run inside [`crate::AsyncDatabase::call`].

use crate::{
    from_millis, to_millis, DatabaseResult, ExpiredLease, LeaseResolutionCounts, NewOutboxRow,
    OutboxCounts, OutboxRow, PendingTenantRow, RowReschedule, TransferHistoryRow,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

// ==========================================
// Outbox
// ==========================================

const OUTBOX_COLUMNS: &str = "row_id, tenant_id, box_id, recipient, drive_id, file_id, priority, added_at, next_run_at, lease_id, leased_at, lease_count, is_transient_file, transfer_instructions, transit_options, client_auth_token, attempts";

fn map_outbox_row(row: &Row<'_>) -> rusqlite::Result<OutboxRow> {
    Ok(OutboxRow {
        row_id: row.get(0)?,
        tenant_id: row.get(1)?,
        box_id: row.get(2)?,
        recipient: row.get(3)?,
        drive_id: row.get(4)?,
        file_id: row.get(5)?,
        priority: row.get(6)?,
        added_at: from_millis(row.get(7)?),
        next_run_at: from_millis(row.get(8)?),
        lease_id: row.get(9)?,
        leased_at: row.get::<_, Option<i64>>(10)?.map(from_millis),
        lease_count: row.get(11)?,
        is_transient_file: row.get(12)?,
        transfer_instructions: row.get(13)?,
        transit_options: row.get(14)?,
        client_auth_token: row.get(15)?,
        attempts: row.get(16)?,
    })
}

/// Insert outbox rows in one transaction. Returns the new row ids in
/// input order.
pub fn insert_outbox_rows(
    conn: &Connection,
    rows: &[NewOutboxRow],
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<i64>> {
    let now = to_millis(now);
    let tx = conn.unchecked_transaction()?;
    let mut ids = Vec::with_capacity(rows.len());
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO outbox (tenant_id, box_id, recipient, drive_id, file_id, priority, added_at, next_run_at, is_transient_file, transfer_instructions, transit_options, client_auth_token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.tenant_id,
                row.box_id,
                row.recipient,
                row.drive_id,
                row.file_id,
                row.priority,
                now,
                row.is_transient_file,
                row.transfer_instructions,
                row.transit_options,
                row.client_auth_token,
            ])?;
            ids.push(tx.last_insert_rowid());
        }
    }
    tx.commit()?;
    Ok(ids)
}

/// Get a single outbox row by id.
pub fn get_outbox_row(conn: &Connection, row_id: i64) -> DatabaseResult<Option<OutboxRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE row_id = ?1"
    ))?;

    match stmt.query_row(params![row_id], map_outbox_row) {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Lease up to `limit` visible rows of one box.
///
/// Visible means unleased and due (`next_run_at <= now`). Rows are taken
/// by priority, then insertion time, and stamped with `lease_id` in a
/// single UPDATE so two concurrent pops can never take the same row.
pub fn pop_outbox_batch(
    conn: &Connection,
    tenant_id: &str,
    box_id: &str,
    limit: usize,
    lease_id: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxRow>> {
    let now = to_millis(now);
    let leased = conn.execute(
        "UPDATE outbox SET lease_id = ?1, leased_at = ?2, lease_count = lease_count + 1
         WHERE row_id IN (
             SELECT row_id FROM outbox
             WHERE tenant_id = ?3 AND box_id = ?4 AND lease_id IS NULL AND next_run_at <= ?2
             ORDER BY priority ASC, added_at ASC, row_id ASC
             LIMIT ?5
         )",
        params![lease_id, now, tenant_id, box_id, limit as i64],
    )?;

    if leased == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE lease_id = ?1
         ORDER BY priority ASC, added_at ASC, row_id ASC"
    ))?;
    let rows = stmt
        .query_map(params![lease_id], map_outbox_row)?
        .collect::<Result<Vec<_>, _>>()?;

    debug!(tenant_id, box_id, lease_id, count = rows.len(), "Leased outbox rows");
    Ok(rows)
}

/// Resolve the rows of a lease in one transaction.
///
/// `committed` rows are deleted, `rescheduled` rows return to the queue at
/// their own `next_run_at`, and every other row still held by the lease is
/// released at `release_at`. Returns `None` without touching anything when
/// the lease no longer holds exactly `held_rows` rows (it was reclaimed or
/// already resolved).
pub fn resolve_leased_rows(
    conn: &Connection,
    lease_id: &str,
    held_rows: usize,
    committed: &[i64],
    rescheduled: &[RowReschedule],
    release_at: DateTime<Utc>,
) -> DatabaseResult<Option<LeaseResolutionCounts>> {
    let tx = conn.unchecked_transaction()?;

    let held: i64 = tx.query_row(
        "SELECT COUNT(*) FROM outbox WHERE lease_id = ?1",
        params![lease_id],
        |row| row.get(0),
    )?;
    if held as usize != held_rows {
        return Ok(None);
    }

    let mut counts = LeaseResolutionCounts::default();
    {
        let mut delete = tx.prepare_cached("DELETE FROM outbox WHERE row_id = ?1 AND lease_id = ?2")?;
        for row_id in committed {
            counts.committed += delete.execute(params![row_id, lease_id])?;
        }

        let mut reschedule = tx.prepare_cached(
            "UPDATE outbox SET lease_id = NULL, leased_at = NULL, next_run_at = ?1, attempts = COALESCE(?2, attempts)
             WHERE row_id = ?3 AND lease_id = ?4",
        )?;
        for row in rescheduled {
            counts.rescheduled += reschedule.execute(params![
                to_millis(row.next_run_at),
                row.attempts,
                row.row_id,
                lease_id
            ])?;
        }
    }

    counts.released = tx.execute(
        "UPDATE outbox SET lease_id = NULL, leased_at = NULL, next_run_at = MAX(next_run_at, ?1)
         WHERE lease_id = ?2",
        params![to_millis(release_at), lease_id],
    )?;

    tx.commit()?;
    debug!(
        lease_id,
        committed = counts.committed,
        rescheduled = counts.rescheduled,
        released = counts.released,
        "Resolved outbox lease"
    );
    Ok(Some(counts))
}

/// Delete unleased rows for one (recipient, file). Leased rows are left to
/// their worker.
pub fn delete_unleased_rows(
    conn: &Connection,
    tenant_id: &str,
    recipient: &str,
    drive_id: &str,
    file_id: &str,
) -> DatabaseResult<usize> {
    let count = conn.execute(
        "DELETE FROM outbox
         WHERE tenant_id = ?1 AND recipient = ?2 AND drive_id = ?3 AND file_id = ?4 AND lease_id IS NULL",
        params![tenant_id, recipient, drive_id, file_id],
    )?;
    Ok(count)
}

/// Count rows of any recipient, leased or not, that reference a file.
pub fn count_rows_referencing_file(
    conn: &Connection,
    tenant_id: &str,
    drive_id: &str,
    file_id: &str,
) -> DatabaseResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE tenant_id = ?1 AND drive_id = ?2 AND file_id = ?3",
        params![tenant_id, drive_id, file_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Totals for one tenant's outbox.
pub fn get_outbox_counts(conn: &Connection, tenant_id: &str) -> DatabaseResult<OutboxCounts> {
    let counts = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN lease_id IS NOT NULL THEN 1 ELSE 0 END), 0),
                MIN(CASE WHEN lease_id IS NULL THEN next_run_at END)
         FROM outbox WHERE tenant_id = ?1",
        params![tenant_id],
        |row| {
            Ok(OutboxCounts {
                total: row.get(0)?,
                leased: row.get(1)?,
                next_run_at: row.get::<_, Option<i64>>(2)?.map(from_millis),
            })
        },
    )?;
    Ok(counts)
}

/// Boxes of a tenant that have at least one visible row, most urgent first.
pub fn list_due_boxes(conn: &Connection, tenant_id: &str, now: DateTime<Utc>) -> DatabaseResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT box_id FROM outbox
         WHERE tenant_id = ?1 AND lease_id IS NULL AND next_run_at <= ?2
         GROUP BY box_id
         ORDER BY MIN(priority) ASC, MIN(added_at) ASC",
    )?;
    let boxes = stmt
        .query_map(params![tenant_id, to_millis(now)], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(boxes)
}

/// Tenants that have any outbox rows at all.
pub fn list_outbox_tenants(conn: &Connection) -> DatabaseResult<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT DISTINCT tenant_id FROM outbox ORDER BY tenant_id")?;
    let tenants = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tenants)
}

/// Release every outbox lease taken before `leased_before`.
///
/// Returns one entry per (lease, tenant) that was reclaimed.
pub fn reclaim_expired_outbox_leases(
    conn: &Connection,
    leased_before: DateTime<Utc>,
) -> DatabaseResult<Vec<ExpiredLease>> {
    let threshold = to_millis(leased_before);
    let tx = conn.unchecked_transaction()?;

    let expired = {
        let mut stmt = tx.prepare_cached(
            "SELECT lease_id, tenant_id, COUNT(*) FROM outbox
             WHERE lease_id IS NOT NULL AND leased_at < ?1
             GROUP BY lease_id, tenant_id",
        )?;
        let rows = stmt
            .query_map(params![threshold], |row| {
                Ok(ExpiredLease {
                    lease_id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    rows: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    if !expired.is_empty() {
        tx.execute(
            "UPDATE outbox SET lease_id = NULL, leased_at = NULL
             WHERE lease_id IS NOT NULL AND leased_at < ?1",
            params![threshold],
        )?;
    }
    tx.commit()?;
    Ok(expired)
}

// ==========================================
// Pending tenants
// ==========================================

fn map_pending_row(row: &Row<'_>) -> rusqlite::Result<PendingTenantRow> {
    Ok(PendingTenantRow {
        tenant_id: row.get(0)?,
        signaled_at: from_millis(row.get(1)?),
        next_scan_at: from_millis(row.get(2)?),
        lease_id: row.get(3)?,
        leased_at: row.get::<_, Option<i64>>(4)?.map(from_millis),
        resignaled: row.get(5)?,
    })
}

/// Record that a tenant has work.
///
/// A second signal for an unleased record only pulls its scan time
/// forward; a signal for a leased record sets `resignaled` so the
/// driver's commit re-arms instead of deleting.
pub fn upsert_pending_tenant(conn: &Connection, tenant_id: &str, now: DateTime<Utc>) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO pending_tenants (tenant_id, signaled_at, next_scan_at)
         VALUES (?1, ?2, ?2)
         ON CONFLICT(tenant_id) DO UPDATE SET
             resignaled = CASE WHEN pending_tenants.lease_id IS NOT NULL THEN 1 ELSE pending_tenants.resignaled END,
             next_scan_at = CASE WHEN pending_tenants.lease_id IS NULL
                                 THEN MIN(pending_tenants.next_scan_at, excluded.next_scan_at)
                                 ELSE pending_tenants.next_scan_at END",
        params![tenant_id, to_millis(now)],
    )?;
    Ok(())
}

/// Lease up to `limit` due, unleased tenant records.
pub fn pop_pending_tenants(
    conn: &Connection,
    lease_id: &str,
    now: DateTime<Utc>,
    limit: usize,
) -> DatabaseResult<Vec<String>> {
    let now = to_millis(now);
    let leased = conn.execute(
        "UPDATE pending_tenants SET lease_id = ?1, leased_at = ?2
         WHERE tenant_id IN (
             SELECT tenant_id FROM pending_tenants
             WHERE lease_id IS NULL AND next_scan_at <= ?2
             ORDER BY next_scan_at ASC, signaled_at ASC
             LIMIT ?3
         )",
        params![lease_id, now, limit as i64],
    )?;
    if leased == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare_cached(
        "SELECT tenant_id FROM pending_tenants WHERE lease_id = ?1
         ORDER BY next_scan_at ASC, signaled_at ASC",
    )?;
    let tenants = stmt
        .query_map(params![lease_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tenants)
}

/// Clear a leased tenant signal. A record that was re-signaled while
/// leased is re-armed for `now` instead. Returns false if the lease no
/// longer holds the record.
pub fn commit_pending_tenant(
    conn: &Connection,
    lease_id: &str,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM pending_tenants WHERE tenant_id = ?1 AND lease_id = ?2 AND resignaled = 0",
        params![tenant_id, lease_id],
    )?;
    if deleted > 0 {
        return Ok(true);
    }

    let rearmed = conn.execute(
        "UPDATE pending_tenants
         SET lease_id = NULL, leased_at = NULL, resignaled = 0, next_scan_at = ?3
         WHERE tenant_id = ?1 AND lease_id = ?2",
        params![tenant_id, lease_id, to_millis(now)],
    )?;
    Ok(rearmed > 0)
}

/// Return a leased tenant record to the index, due at `next_scan_at`
/// (or at `now` if it was re-signaled meanwhile). Returns false if the
/// lease no longer holds the record.
pub fn rearm_pending_tenant(
    conn: &Connection,
    lease_id: &str,
    tenant_id: &str,
    next_scan_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let rearmed = conn.execute(
        "UPDATE pending_tenants
         SET lease_id = NULL, leased_at = NULL,
             next_scan_at = CASE WHEN resignaled = 1 THEN MIN(?3, ?4) ELSE ?3 END,
             resignaled = 0
         WHERE tenant_id = ?1 AND lease_id = ?2",
        params![tenant_id, lease_id, to_millis(next_scan_at), to_millis(now)],
    )?;
    Ok(rearmed > 0)
}

/// Release tenant leases taken before `leased_before`; the records become
/// due immediately. Returns the affected tenants.
pub fn reclaim_expired_pending_tenants(
    conn: &Connection,
    leased_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<String>> {
    let threshold = to_millis(leased_before);
    let tx = conn.unchecked_transaction()?;

    let tenants = {
        let mut stmt = tx.prepare_cached(
            "SELECT tenant_id FROM pending_tenants
             WHERE lease_id IS NOT NULL AND leased_at < ?1 ORDER BY tenant_id",
        )?;
        let tenants = stmt
            .query_map(params![threshold], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        tenants
    };

    if !tenants.is_empty() {
        tx.execute(
            "UPDATE pending_tenants
             SET lease_id = NULL, leased_at = NULL, resignaled = 0, next_scan_at = ?2
             WHERE lease_id IS NOT NULL AND leased_at < ?1",
            params![threshold, to_millis(now)],
        )?;
    }
    tx.commit()?;
    Ok(tenants)
}

/// All pending-tenant records.
pub fn list_pending_tenants(conn: &Connection) -> DatabaseResult<Vec<PendingTenantRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tenant_id, signaled_at, next_scan_at, lease_id, leased_at, resignaled
         FROM pending_tenants ORDER BY next_scan_at ASC, tenant_id ASC",
    )?;
    let rows = stmt
        .query_map([], map_pending_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ==========================================
// Transfer history
// ==========================================

/// Insert or replace the latest status of one (file, recipient). A row
/// without a delivered version tag keeps the previously delivered one.
pub fn upsert_transfer_history(conn: &Connection, row: &TransferHistoryRow) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO transfer_history (tenant_id, drive_id, file_id, recipient, latest_status, latest_problem, delivered_version_tag, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(tenant_id, drive_id, file_id, recipient) DO UPDATE SET
             latest_status = excluded.latest_status,
             latest_problem = excluded.latest_problem,
             delivered_version_tag = COALESCE(excluded.delivered_version_tag, transfer_history.delivered_version_tag),
             last_updated = excluded.last_updated",
        params![
            row.tenant_id,
            row.drive_id,
            row.file_id,
            row.recipient,
            row.latest_status,
            row.latest_problem,
            row.delivered_version_tag,
            to_millis(row.last_updated),
        ],
    )?;
    Ok(())
}

/// History rows for one file, ordered by recipient.
pub fn list_transfer_history(
    conn: &Connection,
    tenant_id: &str,
    drive_id: &str,
    file_id: &str,
) -> DatabaseResult<Vec<TransferHistoryRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tenant_id, drive_id, file_id, recipient, latest_status, latest_problem, delivered_version_tag, last_updated
         FROM transfer_history
         WHERE tenant_id = ?1 AND drive_id = ?2 AND file_id = ?3
         ORDER BY recipient ASC",
    )?;
    let rows = stmt
        .query_map(params![tenant_id, drive_id, file_id], |row| {
            Ok(TransferHistoryRow {
                tenant_id: row.get(0)?,
                drive_id: row.get(1)?,
                file_id: row.get(2)?,
                recipient: row.get(3)?,
                latest_status: row.get(4)?,
                latest_problem: row.get(5)?,
                delivered_version_tag: row.get(6)?,
                last_updated: from_millis(row.get(7)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
