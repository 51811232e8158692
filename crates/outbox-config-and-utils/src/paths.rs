//! File system layout of an outbox host.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

const BASE_DIR_NAME: &str = ".peer-outbox";

/// Manages file system paths for the outbox host.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.peer-outbox)
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.peer-outbox`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir().ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Config file (~/.peer-outbox/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Shared outbox database (~/.peer-outbox/outbox.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("outbox.sqlite")
    }

    /// Host key that seals client tokens and key headers at rest.
    pub fn token_key_file(&self) -> PathBuf {
        self.base_dir.join("token.key")
    }

    pub fn tenants_dir(&self) -> PathBuf {
        self.base_dir.join("tenants")
    }

    /// Per-tenant drives and connections (~/.peer-outbox/tenants/<tenant>).
    pub fn tenant_dir(&self, tenant: &str) -> PathBuf {
        self.tenants_dir().join(tenant)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.tenants_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
