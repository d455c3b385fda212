//! Persistence of the reconciliation state between runs

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use gs_common::ReconciliationState;
use tracing::{debug, info};

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last saved state; empty when nothing was saved yet
    async fn load(&self) -> Result<ReconciliationState>;

    async fn save(&self, state: &ReconciliationState) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// JSON file on the local filesystem
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<ReconciliationState> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved state, starting empty");
                return Ok(ReconciliationState::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read state file {}", self.path.display()))
            }
        };

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state file {}", self.path.display()))
    }

    async fn save(&self, state: &ReconciliationState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(state)?;
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        info!(path = %self.path.display(), endpoints = state.endpoints.len(), "Saved state");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}
