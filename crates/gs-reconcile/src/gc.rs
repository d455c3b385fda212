//! Garbage collection of endpoints no longer declared
//!
//! Methods go first, then resource nodes. Node removal runs to a fixed
//! point: each pass deletes the target nodes that have neither methods nor
//! children, which prunes orphaned branches bottom-up and never touches a
//! node still hosting something.

use std::collections::BTreeSet;

use futures::future::try_join_all;
use gs_common::{path, Endpoint};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::remote::Remote;
use crate::tree::ResourceTree;

/// Paths eligible for removal: stale endpoint paths and their ancestors,
/// minus every path a desired endpoint lives on
pub fn removal_targets(stale: &[Endpoint], desired: &[Endpoint]) -> BTreeSet<String> {
    let hosted: BTreeSet<&str> = desired.iter().map(|e| e.path.as_str()).collect();

    stale
        .iter()
        .flat_map(|e| std::iter::once(e.path.clone()).chain(path::ancestors(&e.path)))
        .filter(|p| p != path::ROOT && !hosted.contains(p.as_str()))
        .collect()
}

/// Delete the method bindings of `stale` endpoints that are still present
pub async fn remove_methods(remote: &Remote, api_id: &str, stale: &[Endpoint]) -> Result<usize> {
    if stale.is_empty() {
        return Ok(0);
    }
    let tree = ResourceTree::new(remote.get_resources(api_id).await?);

    let removals = stale.iter().filter_map(|endpoint| {
        let node = tree.find(&endpoint.path)?;
        if !node.methods.contains(&endpoint.method) {
            return None;
        }
        let resource_id = node.id.clone();
        Some(async move {
            match remote.delete_method(api_id, &resource_id, endpoint.method).await {
                Ok(()) => {
                    info!(api_id = %api_id, endpoint = %endpoint.key(), "Removed method");
                    Ok(1)
                }
                Err(e) if e.is_not_found() => Ok(0),
                Err(e) => Err(e),
            }
        })
    });

    let removed: usize = try_join_all(removals).await?.into_iter().sum();
    Ok(removed)
}

/// Delete target nodes with no methods and no children until none qualifies
/// or a pass removes nothing
pub async fn remove_resources(remote: &Remote, api_id: &str, targets: &BTreeSet<String>) -> Result<usize> {
    let mut removed = 0;

    loop {
        let tree = ResourceTree::new(remote.get_resources(api_id).await?);
        let leaves: Vec<(String, String)> = targets
            .iter()
            .filter_map(|p| tree.find(p))
            .filter(|node| !node.is_root() && tree.is_empty_leaf(node))
            .map(|node| (node.id.clone(), node.path.clone()))
            .collect();

        if leaves.is_empty() {
            debug!(api_id = %api_id, removed = removed, "Resource removal reached a fixed point");
            return Ok(removed);
        }

        let deletions = leaves.iter().map(|(id, node_path)| async move {
            match remote.delete_resource(api_id, id).await {
                Ok(()) => {
                    info!(api_id = %api_id, path = %node_path, "Removed resource");
                    Ok(1)
                }
                Err(e) if e.is_not_found() => Ok(0),
                Err(e) => Err(e),
            }
        });
        let pass: usize = try_join_all(deletions).await?.into_iter().sum();
        if pass == 0 {
            // Every leaf was already gone; the listing lags behind the deletes
            debug!(api_id = %api_id, removed = removed, "No resource removed this pass, stopping");
            return Ok(removed);
        }
        removed += pass;
    }
}

/// Delete the whole REST API; every failure is logged and swallowed
pub async fn teardown(remote: &Remote, api_id: &str) {
    match remote.delete_rest_api(api_id).await {
        Ok(()) => info!(api_id = %api_id, "Deleted REST API"),
        Err(e) => warn!(api_id = %api_id, error = %e, "Failed to delete REST API, ignoring"),
    }
}
