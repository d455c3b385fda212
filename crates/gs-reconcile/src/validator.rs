//! Endpoint validation and ownership checks
//!
//! Declarations arrive as raw JSON values so that shape errors are reported
//! against what the user wrote. A valid declaration becomes a canonical
//! [`Endpoint`]: upper-case method, normalized path, derived URL.

use std::collections::HashSet;

use gs_common::{path, Endpoint, FunctionArn, HttpMethod};
use serde_json::Value;
use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::tree::ResourceTree;

/// Where the validated endpoints will be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    pub api_id: String,
    pub stage: String,
    pub region: String,
}

impl ValidationContext {
    pub fn new(api_id: impl Into<String>, stage: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            api_id: api_id.into(),
            stage: stage.into(),
            region: region.into(),
        }
    }

    /// Public invoke URL of `path` on this stage
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "https://{}.execute-api.{}.amazonaws.com/{}{}",
            self.api_id, self.region, self.stage, path
        )
    }
}

fn required_str<'a>(decl: &'a serde_json::Map<String, Value>, field: &str) -> Result<&'a str> {
    match decl.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ReconcileError::invalid(format!(
            "'{}' must be a string, got {}",
            field, other
        ))),
        None => Err(ReconcileError::invalid(format!("'{}' is required", field))),
    }
}

fn check_function(field: &str, value: Option<&str>) -> Result<()> {
    if let Some(value) = value {
        value
            .parse::<FunctionArn>()
            .map_err(|e| ReconcileError::invalid(format!("'{}': {}", field, e)))?;
    }
    Ok(())
}

/// Validate and normalize one raw endpoint declaration
pub fn validate(raw: &Value, ctx: &ValidationContext) -> Result<Endpoint> {
    let decl = raw
        .as_object()
        .ok_or_else(|| ReconcileError::invalid(format!("Endpoint declaration must be an object, got {}", raw)))?;

    let method: HttpMethod = required_str(decl, "method")?
        .parse()
        .map_err(|e| ReconcileError::invalid(format!("{}", e)))?;
    let path = path::normalize(required_str(decl, "path")?)
        .ok_or_else(|| ReconcileError::invalid("'path' must not be empty"))?;

    let mut merged = decl.clone();
    merged.insert("method".to_string(), Value::String(method.as_str().to_string()));
    merged.insert("path".to_string(), Value::String(path.clone()));
    merged.insert("url".to_string(), Value::String(ctx.url_for(&path)));
    // Bound during the run, never taken from the declaration
    merged.remove("id");
    merged.remove("authorizerId");

    let endpoint: Endpoint = serde_json::from_value(Value::Object(merged))
        .map_err(|e| ReconcileError::invalid(format!("{} {}: {}", method, path, e)))?;

    check_function("function", endpoint.function.as_deref())?;
    check_function("authorizer", endpoint.authorizer.as_deref())?;
    if endpoint.function.is_some() && endpoint.proxy_uri.is_some() {
        return Err(ReconcileError::invalid(format!(
            "{} {}: 'function' and 'proxyURI' are mutually exclusive",
            method, path
        )));
    }
    if endpoint.proxy_uri.as_deref().is_some_and(|u| u.trim().is_empty()) {
        return Err(ReconcileError::invalid(format!("{} {}: 'proxyURI' must not be empty", method, path)));
    }

    Ok(endpoint)
}

/// Validate a whole desired set; stops at the first invalid declaration
pub fn validate_all(raw: &[Value], ctx: &ValidationContext) -> Result<Vec<Endpoint>> {
    let mut seen = HashSet::new();
    let mut endpoints = Vec::with_capacity(raw.len());

    for decl in raw {
        let endpoint = validate(decl, ctx)?;
        if !seen.insert(endpoint.key()) {
            return Err(ReconcileError::invalid(format!(
                "Duplicate endpoint {}",
                endpoint.key()
            )));
        }
        endpoints.push(endpoint);
    }

    debug!(count = endpoints.len(), "Validated endpoint declarations");
    Ok(endpoints)
}

/// Fail when a method already bound at the endpoint's path was not created by us
pub fn check_ownership(endpoint: &Endpoint, tree: &ResourceTree, owned: &[Endpoint]) -> Result<()> {
    let key = endpoint.key();
    if tree.has_method(&endpoint.path, endpoint.method) && !owned.iter().any(|e| e.matches(&key)) {
        return Err(ReconcileError::EndpointConflict { key });
    }
    Ok(())
}
