//! Method and integration bindings
//!
//! A method binding is created with the endpoint's authorizer (or none) and
//! an optional API key requirement. Its integration is a function proxy, an
//! HTTP proxy or a mock, always forwarding `Accept-Encoding: identity`.
//! Function-backed endpoints also grant the API invoke permission.

use std::collections::BTreeMap;
use std::time::Duration;

use gs_common::{Endpoint, FunctionArn};
use gs_gateway::{IntegrationKind, InvokeGrant, MethodAuthorization, PutIntegrationRequest, PutMethodRequest};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::remote::Remote;

const IDENTITY_ENCODING_PARAM: &str = "integration.request.header.Accept-Encoding";
const IDENTITY_ENCODING_VALUE: &str = "'identity'";

/// Bounded retry for integrations the control plane reports as mid-update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetry {
    pub cooldown: Duration,
    pub retries: u32,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(2),
            retries: 3,
        }
    }
}

/// Statement id for the API's invoke permission on `function`; stable across runs
pub fn statement_id(api_id: &str, function: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_id.as_bytes());
    hasher.update(b":");
    hasher.update(function.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("gatesync-{}", &digest[..16])
}

fn parse_function(field: &str, value: &str) -> Result<FunctionArn> {
    value
        .parse()
        .map_err(|e| ReconcileError::invalid(format!("'{}': {}", field, e)))
}

fn resource_id(endpoint: &Endpoint) -> Result<&str> {
    endpoint
        .id
        .as_deref()
        .ok_or_else(|| ReconcileError::invalid(format!("{} has no resolved resource", endpoint.key())))
}

fn authorization(endpoint: &Endpoint) -> MethodAuthorization {
    match &endpoint.authorizer_id {
        Some(id) => MethodAuthorization::Custom {
            authorizer_id: id.clone(),
        },
        None => MethodAuthorization::None,
    }
}

pub fn method_request(endpoint: &Endpoint) -> Result<PutMethodRequest> {
    let mut request_parameters = BTreeMap::new();
    if endpoint.passes_greedy_path() {
        if let Some(greedy) = &endpoint.greedy_path {
            request_parameters.insert(format!("method.request.path.{}", greedy), true);
        }
    }

    Ok(PutMethodRequest {
        resource_id: resource_id(endpoint)?.to_string(),
        method: endpoint.method,
        authorization: authorization(endpoint),
        api_key_required: endpoint.api_key_required,
        request_parameters,
    })
}

pub fn integration_request(endpoint: &Endpoint) -> Result<PutIntegrationRequest> {
    let kind = match (&endpoint.function, &endpoint.proxy_uri) {
        (Some(function), _) => IntegrationKind::FunctionProxy {
            uri: parse_function("function", function)?.invoke_uri(),
        },
        (None, Some(uri)) => IntegrationKind::HttpProxy {
            uri: uri.clone(),
            http_method: endpoint.method,
        },
        (None, None) => IntegrationKind::Mock,
    };

    let mut request_parameters = BTreeMap::new();
    request_parameters.insert(IDENTITY_ENCODING_PARAM.to_string(), IDENTITY_ENCODING_VALUE.to_string());
    if endpoint.passes_greedy_path() {
        if let Some(greedy) = &endpoint.greedy_path {
            request_parameters.insert(
                format!("integration.request.path.{}", greedy),
                format!("method.request.path.{}", greedy),
            );
        }
    }

    Ok(PutIntegrationRequest {
        resource_id: resource_id(endpoint)?.to_string(),
        method: endpoint.method,
        kind,
        request_parameters,
    })
}

/// Create the method binding, or bring an existing one's authorization in line.
///
/// `previous` is the recorded endpoint for the same key, if this system owned
/// it before; an authorizer it carried is removed when the endpoint no longer
/// declares one.
pub async fn bind_method(remote: &Remote, api_id: &str, endpoint: &Endpoint, previous: Option<&Endpoint>) -> Result<()> {
    let request = method_request(endpoint)?;

    match remote.put_method(api_id, &request).await {
        Ok(()) => {
            info!(api_id = %api_id, endpoint = %endpoint.key(), "Created method");
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            let had_authorizer = previous.is_some_and(|p| p.authorizer_id.is_some());
            if endpoint.authorizer_id.is_some() || had_authorizer {
                debug!(
                    endpoint = %endpoint.key(),
                    authorizer_id = ?request.authorization.authorizer_id(),
                    "Method exists, updating authorization"
                );
                remote
                    .update_method_authorization(api_id, &request.resource_id, request.method, &request.authorization)
                    .await?;
            } else {
                debug!(endpoint = %endpoint.key(), "Method already exists");
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Put the integration (retrying conflicts after a cooldown) and grant invoke
pub async fn bind_integration(remote: &Remote, api_id: &str, endpoint: &Endpoint, retry: ConflictRetry) -> Result<()> {
    let request = integration_request(endpoint)?;

    let mut attempt = 0;
    loop {
        match remote.put_integration(api_id, &request).await {
            Ok(()) => break,
            Err(e) if e.is_conflict() && attempt < retry.retries => {
                attempt += 1;
                warn!(
                    endpoint = %endpoint.key(),
                    attempt = attempt,
                    cooldown_ms = retry.cooldown.as_millis() as u64,
                    "Integration update in progress, retrying"
                );
                tokio::time::sleep(retry.cooldown).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    debug!(api_id = %api_id, endpoint = %endpoint.key(), "Integration bound");

    if let Some(function) = &endpoint.function {
        grant_invoke(remote, api_id, &parse_function("function", function)?).await?;
    }
    Ok(())
}

/// Let the REST API invoke `function`; an existing grant counts as success
pub async fn grant_invoke(remote: &Remote, api_id: &str, function: &FunctionArn) -> Result<()> {
    let function_arn = function.to_string();
    let grant = InvokeGrant {
        statement_id: statement_id(api_id, &function_arn),
        source_arn: function.execute_api_source_arn(api_id),
        function_arn,
    };

    match remote.grant_invoke(&grant).await {
        Ok(()) => {
            info!(function = %grant.function_arn, "Granted invoke permission");
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            debug!(function = %grant.function_arn, "Invoke permission already present");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
