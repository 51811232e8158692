//! Configuration, paths, logging and secret sealing for the outbox host.

mod config;
mod error;
mod logging;
mod paths;
pub mod token_crypto;

pub use config::{Config, OutboxSettings, TransportSettings, DEFAULT_LOG_LEVEL, MAX_RETRY_DELAY_MS};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
pub use token_crypto::SealingKey;
