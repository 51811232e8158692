//! Async SQLite executor using a dedicated background thread.
//!
//! Every queue, index and history operation goes through [`AsyncDatabase::call`],
//! which ships the closure to a single SQLite thread. Leases are rows in the
//! database, so the executor never holds a lock across a network call: the
//! caller awaits the closure, gets its rows back and is free again.
//!
//! # Design Principles
//!
//! 1. **Single writer**: SQLite serializes writes anyway, so one thread is optimal
//! 2. **No blocking in async context**: Callers await results without blocking threads
//! 3. **DB-only operations**: Only SQL runs inside `call()`

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => DatabaseError::Executor("Connection closed".to_string()),
        other => DatabaseError::Executor(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
///
/// Cloning is cheap; all clones share the same executor thread, so the
/// outbox queues of every tenant and the pending-tenant index can hold
/// their own handle.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// This will:
    /// - Create the database file (and its parent directory) if needed
    /// - Enable WAL mode and performance pragmas
    /// - Run any pending migrations
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening outbox database");

        let conn = Connection::open(path_str.clone())
            .await
            .map_err(|e| DatabaseError::Executor(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str,
        };
        db.configure(true).await?;

        info!(path = %db.path, "Outbox database initialized with WAL mode");
        Ok(db)
    }

    /// Open a private in-memory database with the full schema.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Executor(e.to_string()))?;

        let db = Self {
            conn,
            path: ":memory:".to_string(),
        };
        db.configure(false).await?;
        Ok(db)
    }

    async fn configure(&self, wal: bool) -> DatabaseResult<()> {
        self.call_sqlite(move |conn| {
            if wal {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    PRAGMA mmap_size = 268435456;
                    ",
                )?;
            }
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA cache_size = -16000;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )
        })
        .await?;

        self.call(|conn| migrations::run_migrations(conn)).await
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. The caller's async
    /// task is parked (not blocked) until the result is ready.
    ///
    /// Inside the closure, only SQL and lightweight row mapping belong.
    /// JSON encoding of typed columns, token sealing, file I/O and network
    /// calls all block the single DB thread and must stay outside.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Get the database file path (`:memory:` for in-memory databases).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy by executing a simple query.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the database connection.
    ///
    /// Waits for pending operations, then shuts down the executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Executor(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("outbox.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        assert!(db.health_check().await.is_ok());
        assert!(db_path.exists());

        let tables: Vec<String> = db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .unwrap();

        assert!(tables.contains(&"outbox".to_string()));
        assert!(tables.contains(&"pending_tenants".to_string()));
        assert!(tables.contains(&"transfer_history".to_string()));
    }

    #[tokio::test]
    async fn test_reopen_keeps_migrations() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("outbox.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        db.close().await.unwrap();

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        let applied: i64 = db
            .call_sqlite(|conn| conn.query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(applied, i64::from(migrations::CURRENT_VERSION));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_thread() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        assert_eq!(db.path(), ":memory:");

        db.call_sqlite(|conn| {
            conn.execute_batch(
                "CREATE TABLE counter (id INTEGER PRIMARY KEY, val INTEGER);
                 INSERT INTO counter (val) VALUES (0);",
            )
        })
        .await
        .unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.call_sqlite(|conn| conn.execute("UPDATE counter SET val = val + 1 WHERE id = 1", []))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count: i32 = db
            .call_sqlite(|conn| conn.query_row("SELECT val FROM counter WHERE id = 1", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 10);
    }
}
