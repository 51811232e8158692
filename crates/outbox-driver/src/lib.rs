//! Background scheduling of every tenant's peer transfer outbox.
//!
//! The [`OutboxDriver`] wakes on pending-tenant signals and on a poll
//! interval, drives each signaled tenant's [`TenantOutbox`] on a bounded
//! pool until it is drained or its pass budget runs out, and periodically
//! reclaims leases left behind by crashed or hung passes.

mod driver;
mod error;
mod registry;

pub use driver::{DriverConfig, OutboxDriver, PassReport, TenantOutcome, TenantReport};
pub use error::{DriverError, DriverResult};
pub use registry::{StaticTenantRegistry, TenantOutbox, TenantRegistry};
