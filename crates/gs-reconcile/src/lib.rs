//! GateSync Reconciler
//!
//! Converges a REST API's resource tree onto a declared endpoint set:
//! - [`validator`]: canonical endpoints and ownership checks
//! - [`paths`]: resource node resolution and creation
//! - [`integration`]: method bindings, integrations and invoke grants
//! - [`authorizer`]: custom authorizer reuse, creation and removal
//! - [`gc`]: removal of endpoints no longer declared
//! - [`reconciler`]: the run itself
//!
//! All control-plane calls go through one [`gs_scheduler::Scheduler`].

pub mod authorizer;
pub mod error;
pub mod gc;
pub mod integration;
pub mod paths;
pub mod reconciler;
pub mod remote;
pub mod tree;
pub mod validator;

pub use error::{EndpointFailure, ReconcileError, Result};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig};
pub use remote::Remote;
pub use tree::ResourceTree;
pub use validator::{validate, validate_all, ValidationContext};
