//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version > CURRENT_VERSION {
        return Err(DatabaseError::SchemaTooNew {
            found: current_version,
            supported: CURRENT_VERSION,
        });
    }
    if current_version == CURRENT_VERSION {
        debug!(version = current_version, "Schema up to date");
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox(conn)?;
    }
    if current_version < 2 {
        migrate_v2_pending_tenants(conn)?;
    }
    if current_version < 3 {
        migrate_v3_transfer_history(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: the per-tenant outbox. Every stored field of an item has its own
/// typed column; `lease_id` NULL means the row is visible to pops.
fn migrate_v1_outbox(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbox");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            box_id TEXT NOT NULL,
            recipient TEXT NOT NULL,
            drive_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            added_at INTEGER NOT NULL,
            next_run_at INTEGER NOT NULL,
            lease_id TEXT,
            leased_at INTEGER,
            lease_count INTEGER NOT NULL DEFAULT 0,
            is_transient_file INTEGER NOT NULL DEFAULT 0,
            transfer_instructions TEXT NOT NULL,
            transit_options TEXT NOT NULL,
            client_auth_token BLOB NOT NULL,
            attempts TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_pop
            ON outbox(tenant_id, box_id, lease_id, next_run_at, priority, added_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_file
            ON outbox(tenant_id, drive_id, file_id);
        CREATE INDEX IF NOT EXISTS idx_outbox_lease
            ON outbox(lease_id);
        CREATE INDEX IF NOT EXISTS idx_outbox_leased_at
            ON outbox(leased_at);
        ",
    )?;

    record_migration(conn, 1, "outbox")?;
    Ok(())
}

/// V2: cross-tenant wake index. One row per tenant.
fn migrate_v2_pending_tenants(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: pending tenants");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pending_tenants (
            tenant_id TEXT PRIMARY KEY,
            signaled_at INTEGER NOT NULL,
            next_scan_at INTEGER NOT NULL,
            lease_id TEXT,
            leased_at INTEGER,
            resignaled INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_pending_tenants_scan
            ON pending_tenants(lease_id, next_scan_at);
        CREATE INDEX IF NOT EXISTS idx_pending_tenants_lease
            ON pending_tenants(lease_id);
        ",
    )?;

    record_migration(conn, 2, "pending_tenants")?;
    Ok(())
}

/// V3: latest per-recipient delivery status of a file.
fn migrate_v3_transfer_history(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v3: transfer history");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS transfer_history (
            tenant_id TEXT NOT NULL,
            drive_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            recipient TEXT NOT NULL,
            latest_status TEXT NOT NULL,
            latest_problem TEXT,
            delivered_version_tag TEXT,
            last_updated INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, drive_id, file_id, recipient)
        );
        ",
    )?;

    record_migration(conn, 3, "transfer_history")?;
    Ok(())
}
