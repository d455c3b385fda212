//! Reconciler - drives one sync run
//!
//! Phases, in order:
//! 1. Validate every declaration and check ownership against one listing.
//!    Any failure here aborts before the first write.
//! 2. Resolve paths and attach authorizers, one endpoint at a time.
//! 3. Bind all methods, then all integrations, concurrently.
//! 4. If every endpoint was built, remove stale methods, then stale
//!    resources, then authorizers nothing references any more.
//!
//! Endpoints that fail in phases 2-4 are reported together in
//! [`ReconcileError::Partial`], which still carries the state this run owns.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use gs_common::{Endpoint, EndpointKey, ReconciliationState};
use gs_gateway::{PermissionClient, RestApiClient};
use gs_scheduler::Scheduler;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::authorizer::{detach, AuthorizerManager};
use crate::error::{EndpointFailure, ReconcileError, Result};
use crate::gc;
use crate::integration::{bind_integration, bind_method, ConflictRetry};
use crate::paths::PathResolver;
use crate::remote::Remote;
use crate::tree::ResourceTree;
use crate::validator::{check_ownership, validate_all, ValidationContext};

/// Configuration for the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Wait before re-putting an integration the control plane reports as busy
    pub integration_conflict_cooldown: Duration,
    pub integration_conflict_retries: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            integration_conflict_cooldown: Duration::from_secs(2),
            integration_conflict_retries: 3,
        }
    }
}

impl ReconcilerConfig {
    fn conflict_retry(&self) -> ConflictRetry {
        ConflictRetry {
            cooldown: self.integration_conflict_cooldown,
            retries: self.integration_conflict_retries,
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// Endpoints now owned, with resolved ids; persist this for the next run
    pub state: ReconciliationState,
    /// Previously owned endpoints that were removed
    pub removed: Vec<EndpointKey>,
}

pub struct Reconciler {
    remote: Remote,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn RestApiClient>,
        permissions: Arc<dyn PermissionClient>,
        scheduler: Scheduler,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            remote: Remote::new(api, permissions, scheduler),
            config,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.remote.scheduler()
    }

    /// Id of the REST API called `name`, creating it when absent
    pub async fn ensure_rest_api(&self, name: &str) -> Result<String> {
        if let Some(id) = self.remote.find_rest_api(name).await? {
            info!(api_id = %id, name = %name, "Using existing REST API");
            return Ok(id);
        }
        let id = self.remote.create_rest_api(name).await?;
        info!(api_id = %id, name = %name, backend = %self.remote.backend(), "Created REST API");
        Ok(id)
    }

    /// Publish the current API definition to `stage`
    pub async fn deploy(&self, api_id: &str, stage: &str) -> Result<String> {
        let deployment_id = self.remote.create_deployment(api_id, stage).await?;
        info!(api_id = %api_id, stage = %stage, deployment_id = %deployment_id, "Deployed REST API");
        Ok(deployment_id)
    }

    /// Delete the REST API; best-effort, never fails
    pub async fn teardown(&self, api_id: &str) {
        gc::teardown(&self.remote, api_id).await;
    }

    pub async fn reconcile(
        &self,
        ctx: &ValidationContext,
        desired: &[Value],
        prior: &ReconciliationState,
    ) -> Result<ReconcileOutcome> {
        let api_id = ctx.api_id.as_str();
        info!(api_id = %api_id, desired = desired.len(), prior = prior.endpoints.len(), "Starting reconciliation");

        let owned: &[Endpoint] = match prior.rest_api_id.as_deref() {
            Some(previous) if previous != api_id => {
                warn!(
                    api_id = %api_id,
                    previous_api_id = %previous,
                    "Prior state belongs to another API, treating it as empty"
                );
                &[]
            }
            _ => prior.endpoints.as_slice(),
        };

        let endpoints = validate_all(desired, ctx)?;
        let tree = ResourceTree::new(self.remote.get_resources(api_id).await?);
        for endpoint in &endpoints {
            check_ownership(endpoint, &tree, owned)?;
        }

        let mut failures = Vec::new();

        let mut resolver = PathResolver::new(&self.remote, api_id, tree);
        let mut resolved = Vec::with_capacity(endpoints.len());
        for mut endpoint in endpoints {
            match resolver.resolve(&endpoint.path).await {
                Ok(id) => {
                    endpoint.id = Some(id);
                    resolved.push(endpoint);
                }
                Err(e) => failures.push(EndpointFailure::new(endpoint.key(), e)),
            }
        }

        let mut authorizers = AuthorizerManager::new(&self.remote, api_id);
        let mut authorized = Vec::with_capacity(resolved.len());
        for mut endpoint in resolved {
            match authorizers.attach(&mut endpoint).await {
                Ok(()) => authorized.push(endpoint),
                Err(e) => failures.push(EndpointFailure::new(endpoint.key(), e)),
            }
        }

        let results = join_all(authorized.iter().map(|e| {
            let previous = owned.iter().find(|p| p.matches(&e.key()));
            bind_method(&self.remote, api_id, e, previous)
        }))
        .await;
        let mut bound = Vec::with_capacity(authorized.len());
        for (endpoint, result) in authorized.into_iter().zip(results) {
            match result {
                Ok(()) => bound.push(endpoint),
                Err(e) => failures.push(EndpointFailure::new(endpoint.key(), e)),
            }
        }

        let retry = self.config.conflict_retry();
        let results = join_all(bound.iter().map(|e| bind_integration(&self.remote, api_id, e, retry))).await;
        let mut built = Vec::with_capacity(bound.len());
        let mut unfinished = Vec::new();
        for (endpoint, result) in bound.into_iter().zip(results) {
            match result {
                Ok(()) => built.push(endpoint),
                Err(e) => {
                    failures.push(EndpointFailure::new(endpoint.key(), e));
                    // Its method exists now, so the next run must treat it as ours
                    unfinished.push(endpoint);
                }
            }
        }

        if !failures.is_empty() {
            built.extend(unfinished);
            return Err(partial(api_id, built, owned, failures));
        }

        let desired_keys: HashSet<EndpointKey> = built.iter().map(Endpoint::key).collect();
        let stale: Vec<Endpoint> = owned
            .iter()
            .filter(|e| !desired_keys.contains(&e.key()))
            .cloned()
            .collect();

        if let Err(failures) = self.collect_garbage(api_id, &stale, &built, owned).await {
            // Keep the authorizer that failed to go, so the next run retries it
            let failed: HashSet<EndpointKey> = failures.iter().map(|f| f.key.clone()).collect();
            for endpoint in built.iter_mut().filter(|e| e.authorizer_id.is_none()) {
                let key = endpoint.key();
                if failed.contains(&key) {
                    endpoint.authorizer_id = owned
                        .iter()
                        .find(|p| p.matches(&key))
                        .and_then(|p| p.authorizer_id.clone());
                }
            }
            return Err(partial(api_id, built, owned, failures));
        }

        let removed: Vec<EndpointKey> = stale.iter().map(Endpoint::key).collect();
        info!(
            api_id = %api_id,
            endpoints = built.len(),
            removed = removed.len(),
            "Reconciliation complete"
        );

        Ok(ReconcileOutcome {
            state: ReconciliationState::new(api_id, built),
            removed,
        })
    }

    /// Remove what `stale` left behind; on error, the endpoints the failure concerns
    async fn collect_garbage(
        &self,
        api_id: &str,
        stale: &[Endpoint],
        desired: &[Endpoint],
        owned: &[Endpoint],
    ) -> std::result::Result<(), Vec<EndpointFailure>> {
        let fail_all = |endpoints: &[Endpoint], e: ReconcileError| -> Vec<EndpointFailure> {
            error!(api_id = %api_id, error = %e, "Garbage collection aborted");
            endpoints
                .iter()
                .map(|endpoint| EndpointFailure::new(endpoint.key(), e.clone()))
                .collect()
        };

        let methods = gc::remove_methods(&self.remote, api_id, stale)
            .await
            .map_err(|e| fail_all(stale, e))?;

        let targets = gc::removal_targets(stale, desired);
        let resources = gc::remove_resources(&self.remote, api_id, &targets)
            .await
            .map_err(|e| fail_all(stale, e))?;

        let referenced: HashSet<&str> = desired.iter().filter_map(|e| e.authorizer_id.as_deref()).collect();
        let mut unreferenced: IndexMap<&str, Vec<&Endpoint>> = IndexMap::new();
        for endpoint in owned {
            if let Some(id) = endpoint.authorizer_id.as_deref() {
                if !referenced.contains(id) {
                    unreferenced.entry(id).or_default().push(endpoint);
                }
            }
        }

        let authorizers = unreferenced.len();
        for (authorizer_id, bound) in unreferenced {
            if let Err(e) = detach(&self.remote, api_id, authorizer_id, &bound, desired).await {
                let group: Vec<Endpoint> = bound.into_iter().cloned().collect();
                return Err(fail_all(&group, e));
            }
        }

        if methods + resources + authorizers > 0 {
            info!(
                api_id = %api_id,
                methods = methods,
                resources = resources,
                authorizers = authorizers,
                "Removed stale resources"
            );
        }
        Ok(())
    }
}

/// State owned after a failed run: what this run built plus prior
/// endpoints it did not rebuild
fn partial(api_id: &str, built: Vec<Endpoint>, owned: &[Endpoint], failures: Vec<EndpointFailure>) -> ReconcileError {
    let rebuilt: HashSet<EndpointKey> = built.iter().map(Endpoint::key).collect();
    let mut endpoints = built;
    endpoints.extend(owned.iter().filter(|e| !rebuilt.contains(&e.key())).cloned());

    for failure in &failures {
        error!(api_id = %api_id, endpoint = %failure.key, error = %failure.error, "Endpoint failed");
    }

    ReconcileError::Partial {
        state: Box::new(ReconciliationState::new(api_id, endpoints)),
        failures,
    }
}
