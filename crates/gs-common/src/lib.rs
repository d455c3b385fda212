use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod function;
pub mod path;

pub use function::{FunctionArn, FunctionArnError};

// ============================================================================
// Endpoint Types
// ============================================================================

/// HTTP methods a REST API method binding can be declared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Any,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Any,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Any => "ANY",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported HTTP method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        HttpMethod::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

/// Identity of an endpoint within a desired set: unique (method, path) pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointKey {
    pub method: HttpMethod,
    pub path: String,
}

impl EndpointKey {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A declared (method, path) binding to a backend target.
///
/// Built fresh from configuration for every reconciliation run and filled in
/// with `id`, `authorizer_id` and `url` as the run resolves them. Fields the
/// declaration carries that this type does not know about are kept in
/// `extra` so they survive into the persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: String,
    /// Fully-qualified identifier of the backing function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Upstream URI for a generic HTTP proxy integration
    #[serde(default, rename = "proxyURI", skip_serializing_if = "Option::is_none")]
    pub proxy_uri: Option<String>,
    /// Name of the greedy path parameter captured by the proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greedy_path: Option<String>,
    /// Fully-qualified identifier of the authorizer function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub api_key_required: bool,
    /// Remote resource node hosting this endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Endpoint {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            function: None,
            proxy_uri: None,
            greedy_path: None,
            authorizer: None,
            authorizer_id: None,
            api_key_required: false,
            id: None,
            url: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(self.method, self.path.clone())
    }

    pub fn matches(&self, key: &EndpointKey) -> bool {
        self.method == key.method && self.path == key.path
    }

    /// True when the endpoint proxies a greedy path capture through to its upstream
    pub fn passes_greedy_path(&self) -> bool {
        self.proxy_uri.is_some() && self.greedy_path.is_some()
    }
}

// ============================================================================
// Remote Resource Types
// ============================================================================

/// A node of the remote path tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNode {
    pub id: String,
    pub path: String,
    pub parent_id: Option<String>,
    pub path_part: Option<String>,
    #[serde(default)]
    pub methods: BTreeSet<HttpMethod>,
}

impl ResourceNode {
    pub fn is_root(&self) -> bool {
        self.path == "/"
    }
}

/// A custom authorizer registered on a REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorizer {
    pub id: String,
    pub name: String,
    pub function_arn: Option<String>,
}

// ============================================================================
// Reconciliation State
// ============================================================================

/// Endpoints a previous run created, as persisted by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_api_id: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl ReconciliationState {
    pub fn new(rest_api_id: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            rest_api_id: Some(rest_api_id.into()),
            endpoints,
            reconciled_at: Some(Utc::now()),
        }
    }

    pub fn owns(&self, key: &EndpointKey) -> bool {
        self.endpoints.iter().any(|e| e.matches(key))
    }

    pub fn find(&self, key: &EndpointKey) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.matches(key))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Closed classification of a control-plane failure, assigned by the client adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// Request rate exceeded; the only retryable kind
    RateLimited,
    NotFound,
    AlreadyExists,
    Conflict,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed ({kind:?}): {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub operation: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(operation: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::RateLimited, operation, "Rate exceeded")
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, operation, message)
    }

    pub fn already_exists(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::AlreadyExists, operation, message)
    }

    pub fn conflict(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, operation, message)
    }

    pub fn other(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Other, operation, message)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == RemoteErrorKind::RateLimited
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }

    /// Conflict or already-exists: the resource is there, possibly mid-write
    pub fn is_conflict(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Conflict | RemoteErrorKind::AlreadyExists)
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
