//! GateSync Control-Plane Clients
//!
//! The reconciler talks to the remote REST API control plane only through
//! the traits in this crate:
//! - [`RestApiClient`]: API containers, resource nodes, methods, integrations,
//!   authorizers and deployments
//! - [`PermissionClient`]: invoke grants on backing functions
//!
//! Backends:
//! - [`memory::InMemoryGateway`]: in-process model of the control plane (default)
//! - `aws::ApiGatewayClient` / `aws::LambdaPermissionClient` (feature `aws`)
//!
//! Backends classify every failure into a [`RemoteErrorKind`] before it
//! leaves the adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use gs_common::{Authorizer, HttpMethod, RemoteResult, ResourceNode};

pub mod memory;

#[cfg(feature = "aws")]
pub mod aws;

pub use gs_common::{RemoteError, RemoteErrorKind};
pub use memory::InMemoryGateway;

/// Header the token authorizer reads the caller identity from
pub const AUTHORIZER_IDENTITY_SOURCE: &str = "method.request.header.Authorization";

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodAuthorization {
    None,
    Custom { authorizer_id: String },
}

impl MethodAuthorization {
    pub fn authorization_type(&self) -> &'static str {
        match self {
            MethodAuthorization::None => "NONE",
            MethodAuthorization::Custom { .. } => "CUSTOM",
        }
    }

    pub fn authorizer_id(&self) -> Option<&str> {
        match self {
            MethodAuthorization::None => None,
            MethodAuthorization::Custom { authorizer_id } => Some(authorizer_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutMethodRequest {
    pub resource_id: String,
    pub method: HttpMethod,
    pub authorization: MethodAuthorization,
    pub api_key_required: bool,
    /// e.g. `method.request.path.proxy -> true`
    pub request_parameters: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationKind {
    /// Function-proxy integration invoking `uri` with POST
    FunctionProxy { uri: String },
    /// Generic HTTP proxy to an upstream URI
    HttpProxy { uri: String, http_method: HttpMethod },
    /// Fixed 200 response, for endpoints without a backend
    Mock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutIntegrationRequest {
    pub resource_id: String,
    pub method: HttpMethod,
    pub kind: IntegrationKind,
    /// Integration parameter -> source expression
    pub request_parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAuthorizerRequest {
    pub name: String,
    pub authorizer_uri: String,
    pub identity_source: String,
}

/// Permission for the REST API principal to invoke a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeGrant {
    pub function_arn: String,
    pub statement_id: String,
    pub source_arn: String,
}

// ============================================================================
// Client Traits
// ============================================================================

#[async_trait]
pub trait RestApiClient: Send + Sync {
    async fn find_rest_api(&self, name: &str) -> RemoteResult<Option<String>>;

    /// Create a REST API (with its root node) and return its id
    async fn create_rest_api(&self, name: &str) -> RemoteResult<String>;

    async fn delete_rest_api(&self, api_id: &str) -> RemoteResult<()>;

    /// Every resource node of the API, with bound methods
    async fn get_resources(&self, api_id: &str) -> RemoteResult<Vec<ResourceNode>>;

    async fn create_resource(
        &self,
        api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> RemoteResult<ResourceNode>;

    /// Deletes the node and everything below it
    async fn delete_resource(&self, api_id: &str, resource_id: &str) -> RemoteResult<()>;

    async fn put_method(&self, api_id: &str, request: &PutMethodRequest) -> RemoteResult<()>;

    async fn update_method_authorization(
        &self,
        api_id: &str,
        resource_id: &str,
        method: HttpMethod,
        authorization: &MethodAuthorization,
    ) -> RemoteResult<()>;

    async fn delete_method(&self, api_id: &str, resource_id: &str, method: HttpMethod) -> RemoteResult<()>;

    async fn put_integration(&self, api_id: &str, request: &PutIntegrationRequest) -> RemoteResult<()>;

    async fn get_authorizers(&self, api_id: &str) -> RemoteResult<Vec<Authorizer>>;

    async fn create_authorizer(
        &self,
        api_id: &str,
        request: &CreateAuthorizerRequest,
    ) -> RemoteResult<Authorizer>;

    async fn delete_authorizer(&self, api_id: &str, authorizer_id: &str) -> RemoteResult<()>;

    /// Deploy the current API definition to `stage`, returning the deployment id
    async fn create_deployment(&self, api_id: &str, stage: &str) -> RemoteResult<String>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

#[async_trait]
pub trait PermissionClient: Send + Sync {
    /// Fails with `AlreadyExists` when the statement id is already present
    async fn grant_invoke(&self, grant: &InvokeGrant) -> RemoteResult<()>;
}
