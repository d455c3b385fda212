//! GateSync Configuration
//!
//! A sync run is described by one TOML file:
//!
//! ```toml
//! [api]
//! name = "orders"
//! stage = "prod"
//!
//! [scheduler]
//! interval_ms = 200
//!
//! [[endpoints]]
//! method = "get"
//! path = "users"
//! function = "arn:aws:lambda:eu-west-1:123456789012:function:users"
//! ```
//!
//! `GATESYNC_API_ID`, `GATESYNC_API_NAME`, `GATESYNC_STAGE` and
//! `GATESYNC_REGION` override the `[api]` table.

use std::path::Path;
use std::time::Duration;

use gs_scheduler::{RetryPolicy, SchedulerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const ENV_API_ID: &str = "GATESYNC_API_ID";
pub const ENV_API_NAME: &str = "GATESYNC_API_NAME";
pub const ENV_STAGE: &str = "GATESYNC_STAGE";
pub const ENV_REGION: &str = "GATESYNC_REGION";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Name used to find or create the REST API
    #[serde(default)]
    pub name: Option<String>,
    /// Known REST API id; skips the lookup by name
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Falls back to the AWS default region chain when unset
    #[serde(default)]
    pub region: Option<String>,
}

fn default_stage() -> String {
    "dev".to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            name: None,
            id: None,
            stage: default_stage(),
            region: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_ms: u64,
    pub concurrency: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            concurrency: 1,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2,
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(self.interval_ms),
            concurrency: self.concurrency,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                multiplier: self.backoff_multiplier,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub integration_conflict_cooldown_ms: u64,
    pub integration_conflict_retries: u32,
    /// Create a deployment after a successful sync
    pub deploy: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            integration_conflict_cooldown_ms: 2000,
            integration_conflict_retries: 3,
            deploy: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    /// Endpoint declarations exactly as written; validated by the reconciler
    #[serde(default)]
    pub endpoints: Vec<serde_json::Value>,
}

impl SyncConfig {
    /// Load from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        info!(
            path = %path.display(),
            endpoints = config.endpoints.len(),
            stage = %config.api.stage,
            "Loaded sync configuration"
        );
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `GATESYNC_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = non_empty(ENV_API_ID) {
            debug!(key = ENV_API_ID, "Overriding API id from environment");
            self.api.id = Some(id);
        }
        if let Some(name) = non_empty(ENV_API_NAME) {
            self.api.name = Some(name);
        }
        if let Some(stage) = non_empty(ENV_STAGE) {
            self.api.stage = stage;
        }
        if let Some(region) = non_empty(ENV_REGION) {
            self.api.region = Some(region);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.name.is_none() && self.api.id.is_none() {
            return Err(ConfigError::Invalid(
                "[api] needs a name or an id".to_string(),
            ));
        }
        if self.api.stage.trim().is_empty() {
            return Err(ConfigError::Invalid("[api] stage must not be empty".to_string()));
        }
        if self.scheduler.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "[scheduler] concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "[scheduler] max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
