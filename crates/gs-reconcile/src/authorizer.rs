//! Custom authorizers
//!
//! Authorizer names derive from the backing function's full ARN, so one
//! function maps to one authorizer per API and lookup by name is lookup by
//! function. An authorizer found under that name but backed by another
//! function is a conflict, never an update.

use std::collections::HashMap;

use gs_common::{Authorizer, Endpoint, EndpointKey, FunctionArn};
use gs_gateway::{CreateAuthorizerRequest, MethodAuthorization, AUTHORIZER_IDENTITY_SOURCE};
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::integration::grant_invoke;
use crate::remote::Remote;

pub struct AuthorizerManager<'a> {
    remote: &'a Remote,
    api_id: &'a str,
    /// Authorizers by name, listed on first use
    known: Option<HashMap<String, Authorizer>>,
}

impl<'a> AuthorizerManager<'a> {
    pub fn new(remote: &'a Remote, api_id: &'a str) -> Self {
        Self {
            remote,
            api_id,
            known: None,
        }
    }

    async fn known(&mut self) -> Result<&mut HashMap<String, Authorizer>> {
        if self.known.is_none() {
            let listed = self.remote.get_authorizers(self.api_id).await?;
            debug!(api_id = %self.api_id, count = listed.len(), "Listed authorizers");
            self.known = Some(listed.into_iter().map(|a| (a.name.clone(), a)).collect());
        }
        Ok(self.known.get_or_insert_with(HashMap::new))
    }

    /// Find or create the endpoint's authorizer and record its id on the endpoint
    pub async fn attach(&mut self, endpoint: &mut Endpoint) -> Result<()> {
        let Some(declared) = endpoint.authorizer.as_deref() else {
            return Ok(());
        };
        let function: FunctionArn = declared
            .parse()
            .map_err(|e| ReconcileError::invalid(format!("'authorizer': {}", e)))?;
        let name = function.authorizer_name();
        let function_arn = function.to_string();

        let existing = self.known().await?.get(&name).cloned();
        let id = match existing {
            Some(authorizer) => {
                if authorizer.function_arn.as_deref() != Some(function_arn.as_str()) {
                    // Renamed or re-pointed outside this system; never take it over
                    warn!(
                        endpoint = %endpoint.key(),
                        authorizer = %name,
                        current = ?authorizer.function_arn,
                        "Authorizer name is taken by another function"
                    );
                    return Err(ReconcileError::EndpointConflict { key: endpoint.key() });
                }
                authorizer.id
            }
            None => {
                let request = CreateAuthorizerRequest {
                    name: name.clone(),
                    authorizer_uri: function.invoke_uri(),
                    identity_source: AUTHORIZER_IDENTITY_SOURCE.to_string(),
                };
                let created = self.remote.create_authorizer(self.api_id, &request).await?;
                info!(api_id = %self.api_id, authorizer = %name, authorizer_id = %created.id, "Created authorizer");
                grant_invoke(self.remote, self.api_id, &function).await?;

                let id = created.id.clone();
                self.known().await?.insert(name, created);
                id
            }
        };

        endpoint.authorizer_id = Some(id);
        Ok(())
    }
}

/// Remove an authorizer no desired endpoint references.
///
/// `bound` are the previously recorded endpoints whose methods use it; each
/// method is downgraded to no authorization before the authorizer is deleted.
/// Methods already re-pointed at another authorizer by `desired` are left alone.
pub async fn detach(
    remote: &Remote,
    api_id: &str,
    authorizer_id: &str,
    bound: &[&Endpoint],
    desired: &[Endpoint],
) -> Result<()> {
    let references: Vec<EndpointKey> = desired
        .iter()
        .filter(|e| e.authorizer_id.as_deref() == Some(authorizer_id))
        .map(Endpoint::key)
        .collect();
    if !references.is_empty() {
        return Err(ReconcileError::AuthorizerInUse {
            authorizer_id: authorizer_id.to_string(),
            references,
        });
    }

    for endpoint in bound {
        let key = endpoint.key();
        let repointed = desired
            .iter()
            .any(|d| d.matches(&key) && d.authorizer_id.is_some());
        let Some(resource_id) = endpoint.id.as_deref() else {
            continue;
        };
        if repointed {
            continue;
        }

        match remote
            .update_method_authorization(api_id, resource_id, endpoint.method, &MethodAuthorization::None)
            .await
        {
            Ok(()) => debug!(endpoint = %key, "Removed authorizer from method"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    match remote.delete_authorizer(api_id, authorizer_id).await {
        Ok(()) => {
            info!(api_id = %api_id, authorizer_id = %authorizer_id, "Deleted authorizer");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
