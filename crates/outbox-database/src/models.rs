//! Row models for the outbox tables.
//!
//! Typed columns (`transfer_instructions`, `transit_options`, `attempts`)
//! are carried as JSON text at this layer; the queue crate owns the Rust
//! types they decode into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the `outbox` table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub row_id: i64,
    pub tenant_id: String,
    pub box_id: String,
    pub recipient: String,
    pub drive_id: String,
    pub file_id: String,
    pub priority: i32,
    pub added_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
    pub lease_id: Option<String>,
    pub leased_at: Option<DateTime<Utc>>,
    pub lease_count: i64,
    pub is_transient_file: bool,
    pub transfer_instructions: String,
    pub transit_options: String,
    pub client_auth_token: Vec<u8>,
    pub attempts: String,
}

/// New outbox row for insertion. `added_at` and `next_run_at` are set
/// from the insert time.
#[derive(Debug, Clone)]
pub struct NewOutboxRow {
    pub tenant_id: String,
    pub box_id: String,
    pub recipient: String,
    pub drive_id: String,
    pub file_id: String,
    pub priority: i32,
    pub is_transient_file: bool,
    pub transfer_instructions: String,
    pub transit_options: String,
    pub client_auth_token: Vec<u8>,
}

/// Per-row reschedule: the row becomes visible again at `next_run_at`.
/// When `attempts` is set it replaces the stored attempt log.
#[derive(Debug, Clone)]
pub struct RowReschedule {
    pub row_id: i64,
    pub next_run_at: DateTime<Utc>,
    pub attempts: Option<String>,
}

/// What happened to the rows of one lease during resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseResolutionCounts {
    pub committed: usize,
    pub rescheduled: usize,
    pub released: usize,
}

/// Aggregate view of one tenant's outbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub total: i64,
    pub leased: i64,
    /// Earliest `next_run_at` among unleased rows.
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A lease found past its expiry by the reclaimer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredLease {
    pub lease_id: String,
    pub tenant_id: String,
    pub rows: usize,
}

/// A row of the `pending_tenants` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTenantRow {
    pub tenant_id: String,
    pub signaled_at: DateTime<Utc>,
    pub next_scan_at: DateTime<Utc>,
    pub lease_id: Option<String>,
    pub leased_at: Option<DateTime<Utc>>,
    /// Set when `MarkPending` lands while the record is leased.
    pub resignaled: bool,
}

/// A row of the `transfer_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferHistoryRow {
    pub tenant_id: String,
    pub drive_id: String,
    pub file_id: String,
    pub recipient: String,
    pub latest_status: String,
    pub latest_problem: Option<String>,
    pub delivered_version_tag: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Convert a timestamp to the stored unix-millisecond form.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert a stored unix-millisecond value back to a timestamp.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
