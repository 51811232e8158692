//! Configuration for the outbox host.
//!
//! Loaded from `<base>/config.json` when present, then overridden by
//! `PEER_OUTBOX_*` environment variables. Every section has defaults, so an
//! empty or partial file is valid.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound for the retry delays: one day.
pub const MAX_RETRY_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Queue, driver and retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    /// Items leased per pop.
    pub batch_size: usize,
    pub max_batches_per_tenant_pass: usize,
    /// Wall-clock budget for one tenant before it is handed back.
    pub tenant_pass_budget_ms: u64,
    pub max_concurrent_tenants: usize,
    /// Distinct recipients delivered concurrently within a batch.
    pub recipient_concurrency: usize,
    pub max_tenants_per_scan: usize,
    pub poll_interval_ms: u64,
    pub lease_timeout_secs: u64,
    pub reclaim_interval_secs: u64,
    pub retry_delay_ms: u64,
    pub retry_exponential: bool,
    pub retry_max_delay_ms: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_batches_per_tenant_pass: 10,
            tenant_pass_budget_ms: 30_000,
            max_concurrent_tenants: 4,
            recipient_concurrency: 4,
            max_tenants_per_scan: 100,
            poll_interval_ms: 5_000,
            lease_timeout_secs: 300,
            reclaim_interval_secs: 60,
            retry_delay_ms: 5_000,
            retry_exponential: false,
            retry_max_delay_ms: 300_000,
        }
    }
}

impl OutboxSettings {
    pub fn tenant_pass_budget(&self) -> Duration {
        Duration::from_millis(self.tenant_pass_budget_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// How recipient hosts are reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub scheme: String,
    pub port: Option<u16>,
    pub path: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: None,
            path: "/api/peer/v1/transfer".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    pub outbox: OutboxSettings,
    pub transport: TransportSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            outbox: OutboxSettings::default(),
            transport: TransportSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the base directory, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `PEER_OUTBOX_*` overrides from `lookup`. Unparseable values
    /// are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("PEER_OUTBOX_LOG_LEVEL") {
            self.log_level = level;
        }
        override_number(&lookup, "PEER_OUTBOX_BATCH_SIZE", &mut self.outbox.batch_size);
        override_number(&lookup, "PEER_OUTBOX_RETRY_DELAY_MS", &mut self.outbox.retry_delay_ms);
        override_number(
            &lookup,
            "PEER_OUTBOX_MAX_CONCURRENT_TENANTS",
            &mut self.outbox.max_concurrent_tenants,
        );
    }

    pub fn validate(&self) -> CoreResult<()> {
        let outbox = &self.outbox;
        let positive = [
            ("batch_size", outbox.batch_size),
            ("max_batches_per_tenant_pass", outbox.max_batches_per_tenant_pass),
            ("max_concurrent_tenants", outbox.max_concurrent_tenants),
            ("recipient_concurrency", outbox.recipient_concurrency),
            ("max_tenants_per_scan", outbox.max_tenants_per_scan),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::Config(format!("outbox.{} must be positive", name)));
            }
        }
        if outbox.lease_timeout_secs == 0 {
            return Err(CoreError::Config("outbox.lease_timeout_secs must be positive".to_string()));
        }
        for (name, value) in [
            ("retry_delay_ms", outbox.retry_delay_ms),
            ("retry_max_delay_ms", outbox.retry_max_delay_ms),
        ] {
            if value > MAX_RETRY_DELAY_MS {
                return Err(CoreError::Config(format!(
                    "outbox.{} must be at most {} ms",
                    name, MAX_RETRY_DELAY_MS
                )));
            }
        }
        if outbox.retry_exponential && outbox.retry_max_delay_ms < outbox.retry_delay_ms {
            return Err(CoreError::Config(
                "outbox.retry_max_delay_ms must not be below retry_delay_ms".to_string(),
            ));
        }
        if !matches!(self.transport.scheme.as_str(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "transport.scheme must be http or https, got {}",
                self.transport.scheme
            )));
        }
        Ok(())
    }
}

fn override_number<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T) {
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(variable = name, value = %raw, "Ignoring invalid environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.outbox.batch_size, 10);
        assert_eq!(config.outbox.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.transport.scheme, "https");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "log_level": "debug", "outbox": { "batch_size": 3 } }"#).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.outbox.batch_size, 3);
        assert_eq!(config.outbox.lease_timeout_secs, 300);
        assert_eq!(config.transport.path, "/api/peer/v1/transfer");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.outbox.retry_exponential = true;
        config.transport.port = Some(8443);
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PEER_OUTBOX_LOG_LEVEL", "trace"),
            ("PEER_OUTBOX_BATCH_SIZE", "25"),
            ("PEER_OUTBOX_RETRY_DELAY_MS", "not-a-number"),
            ("PEER_OUTBOX_MAX_CONCURRENT_TENANTS", "8"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.outbox.batch_size, 25);
        assert_eq!(config.outbox.retry_delay_ms, 5_000);
        assert_eq!(config.outbox.max_concurrent_tenants, 8);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.outbox.batch_size = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let mut config = Config::default();
        config.outbox.lease_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.scheme = "ftp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_retry_delays() {
        let mut config = Config::default();
        config.apply_overrides(|name| (name == "PEER_OUTBOX_RETRY_DELAY_MS").then(|| u64::MAX.to_string()));
        assert_eq!(config.outbox.retry_delay_ms, u64::MAX);
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let mut config = Config::default();
        config.outbox.retry_max_delay_ms = MAX_RETRY_DELAY_MS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.outbox.retry_delay_ms = MAX_RETRY_DELAY_MS;
        config.outbox.retry_max_delay_ms = MAX_RETRY_DELAY_MS;
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        std::fs::write(paths.config_file(), "{ not json").unwrap();
        assert!(matches!(Config::load(&paths), Err(CoreError::Json(_))));
    }
}
