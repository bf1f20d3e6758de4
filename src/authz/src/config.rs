//! Service configuration loading and validation
//!
//! ```toml
//! metrics_enabled = true
//!
//! [server]
//! listen_addr = "0.0.0.0:8080"
//!
//! [audit]
//! capacity = 10000
//! workers = 2
//! overflow = "drop_oldest"
//!
//! [operations.hello]
//! role = { values = ["ROLE_ADMIN"], message = "Admin permission required" }
//! audit = "HELLO"
//! ```

use crate::audit::{AuditSinkConfig, OverflowPolicy};
use crate::error::{AuthzError, Result};
use crate::policy::{default_true, OperationPolicy, PolicyDeclaration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Overrides `audit.workers`
pub const ENV_AUDIT_WORKERS: &str = "WARDEN_AUDIT_WORKERS";
/// Overrides `audit.capacity`
pub const ENV_AUDIT_CAPACITY: &str = "WARDEN_AUDIT_CAPACITY";
/// Overrides `audit.overflow`
pub const ENV_AUDIT_OVERFLOW: &str = "WARDEN_AUDIT_OVERFLOW";

/// Complete service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub audit: AuditSinkConfig,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Per-operation policies, keyed by operation name
    #[serde(default)]
    pub operations: BTreeMap<String, OperationPolicy>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            audit: AuditSinkConfig::default(),
            metrics_enabled: true,
            operations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl WardenConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::from_toml_str(&contents)?;
        debug!(
            "Loaded configuration from {} ({} operations)",
            path.display(),
            config.operations.len()
        );
        Ok(config)
    }

    /// Apply `WARDEN_AUDIT_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_AUDIT_WORKERS) {
            self.audit.workers = parse_number(ENV_AUDIT_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_AUDIT_CAPACITY) {
            self.audit.capacity = parse_number(ENV_AUDIT_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_AUDIT_OVERFLOW) {
            self.audit.overflow = value.parse::<OverflowPolicy>()?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.audit.validate()?;

        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(AuthzError::Configuration(format!(
                "invalid listen address '{}'",
                self.server.listen_addr
            )));
        }

        for (action, policy) in &self.operations {
            PolicyDeclaration::from_config(action, policy)?;
        }

        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        AuthzError::Configuration(format!(
            "{} must be a non-negative integer, got '{}'",
            key, value
        ))
    })
}
