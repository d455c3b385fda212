//! Path resolution
//!
//! Resolves the chain of resource nodes hosting a path, creating what is
//! missing top-down. Results are memoized per run, so endpoints sharing a
//! prefix converge on the same ancestor nodes.

use std::collections::HashMap;

use gs_common::{path, RemoteError};
use tracing::{debug, info};

use crate::error::{ReconcileError, Result};
use crate::remote::Remote;
use crate::tree::ResourceTree;

pub struct PathResolver<'a> {
    remote: &'a Remote,
    api_id: &'a str,
    tree: ResourceTree,
    memo: HashMap<String, String>,
}

impl<'a> PathResolver<'a> {
    /// Start from a listing taken earlier in the same run
    pub fn new(remote: &'a Remote, api_id: &'a str, tree: ResourceTree) -> Self {
        Self {
            remote,
            api_id,
            tree,
            memo: HashMap::new(),
        }
    }

    pub async fn load(remote: &'a Remote, api_id: &'a str) -> Result<PathResolver<'a>> {
        let nodes = remote
            .get_resources(api_id)
            .await
            .map_err(|source| ReconcileError::PathResolution {
                path: path::ROOT.to_string(),
                source,
            })?;
        Ok(Self::new(remote, api_id, ResourceTree::new(nodes)))
    }

    /// Node id hosting the normalized `target` path
    pub async fn resolve(&mut self, target: &str) -> Result<String> {
        if let Some(id) = self.lookup(target) {
            return Ok(id);
        }

        let mut current = path::ROOT.to_string();
        let mut current_id = self.lookup(path::ROOT).ok_or_else(|| ReconcileError::PathResolution {
            path: target.to_string(),
            source: RemoteError::not_found("GetResources", "API has no root resource"),
        })?;

        for segment in path::segments(target).map(str::to_string).collect::<Vec<_>>() {
            let next = path::join(&current, &segment);
            current_id = match self.lookup(&next) {
                Some(id) => id,
                None => self.create(&current_id, &segment, &next).await?,
            };
            current = next;
        }

        Ok(current_id)
    }

    fn lookup(&mut self, target: &str) -> Option<String> {
        if let Some(id) = self.memo.get(target) {
            return Some(id.clone());
        }
        let id = self.tree.find(target)?.id.clone();
        self.memo.insert(target.to_string(), id.clone());
        Some(id)
    }

    async fn create(&mut self, parent_id: &str, segment: &str, target: &str) -> Result<String> {
        match self.remote.create_resource(self.api_id, parent_id, segment).await {
            Ok(node) => {
                info!(api_id = %self.api_id, path = %target, resource_id = %node.id, "Created resource");
                let id = node.id.clone();
                self.tree.insert(node);
                self.memo.insert(target.to_string(), id.clone());
                Ok(id)
            }
            Err(e) if e.is_conflict() => {
                // Lost a race with another creator; take the winner's node
                debug!(api_id = %self.api_id, path = %target, "Resource already exists, re-reading");
                let nodes = self
                    .remote
                    .get_resources(self.api_id)
                    .await
                    .map_err(|source| ReconcileError::PathResolution {
                        path: target.to_string(),
                        source,
                    })?;
                self.tree = ResourceTree::new(nodes);
                self.lookup(target).ok_or_else(|| ReconcileError::PathResolution {
                    path: target.to_string(),
                    source: e,
                })
            }
            Err(source) => Err(ReconcileError::PathResolution {
                path: target.to_string(),
                source,
            }),
        }
    }

    /// Snapshot as updated by this resolver's own creations
    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }
}
