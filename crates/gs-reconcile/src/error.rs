use gs_common::{EndpointKey, ReconciliationState, RemoteError};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ReconcileError {
    #[error("Invalid endpoint declaration: {0}")]
    InvalidEndpointSpec(String),

    #[error("Endpoint {key} conflicts with a resource this system did not create")]
    EndpointConflict { key: EndpointKey },

    #[error("Failed to resolve path {path}: {source}")]
    PathResolution {
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("Remote operation failed: {0}")]
    RemoteOperationFailed(#[from] RemoteError),

    #[error("Authorizer {authorizer_id} is still referenced by {} endpoint(s)", .references.len())]
    AuthorizerInUse {
        authorizer_id: String,
        references: Vec<EndpointKey>,
    },

    /// Some endpoints could not be reconciled; `state` is what this run owns
    #[error("Reconciliation failed for {} endpoint(s)", .failures.len())]
    Partial {
        state: Box<ReconciliationState>,
        failures: Vec<EndpointFailure>,
    },
}

impl ReconcileError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ReconcileError::InvalidEndpointSpec(message.into())
    }

    /// Underlying remote failure, if the error came from the control plane
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ReconcileError::PathResolution { source, .. } => Some(source),
            ReconcileError::RemoteOperationFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// One endpoint that failed during the build or removal phase
#[derive(Error, Debug, Clone)]
#[error("{key}: {error}")]
pub struct EndpointFailure {
    pub key: EndpointKey,
    pub error: ReconcileError,
}

impl EndpointFailure {
    pub fn new(key: EndpointKey, error: impl Into<ReconcileError>) -> Self {
        Self {
            key,
            error: error.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
