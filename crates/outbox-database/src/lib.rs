//! SQLite persistence for the peer transfer outbox.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned migrations for the outbox, pending-tenant and transfer-history tables
//! - Row models
//! - Free-function queries that take a `&Connection`
//!
//! # Usage
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let counts = db
//!     .call(move |conn| queries::get_outbox_counts(conn, &tenant, now))
//!     .await?;
//! ```
//!
//! **Important**: Only SQL operations should run inside `db.call()`.
//! Serialization of typed columns and any crypto must happen outside.
//!
//! All timestamps are stored as unix milliseconds so ordering and
//! not-before comparisons are plain integer comparisons.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
