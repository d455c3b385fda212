//! In-memory control plane
//!
//! Models the parts of the REST API control plane the reconciler relies on:
//! sibling uniqueness of path parts, recursive resource deletion, method
//! conflicts, authorizers that cannot be deleted while a method references
//! them, and duplicate permission statements. Failures can be injected per
//! operation so callers can exercise retry and recovery paths.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use gs_common::{path, Authorizer, FunctionArn, HttpMethod, RemoteError, RemoteErrorKind, RemoteResult, ResourceNode};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    CreateAuthorizerRequest, InvokeGrant, MethodAuthorization, PermissionClient, PutIntegrationRequest,
    PutMethodRequest, RestApiClient,
};

/// A method binding as the in-memory control plane stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    pub authorization: MethodAuthorization,
    pub api_key_required: bool,
    pub request_parameters: BTreeMap<String, bool>,
    pub integration: Option<PutIntegrationRequest>,
}

#[derive(Debug, Clone)]
struct MemoryResource {
    id: String,
    parent_id: Option<String>,
    path_part: Option<String>,
    path: String,
    methods: BTreeMap<HttpMethod, MethodRecord>,
}

impl MemoryResource {
    fn to_node(&self) -> ResourceNode {
        ResourceNode {
            id: self.id.clone(),
            path: self.path.clone(),
            parent_id: self.parent_id.clone(),
            path_part: self.path_part.clone(),
            methods: self.methods.keys().copied().collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryAuthorizer {
    id: String,
    name: String,
    uri: String,
}

impl MemoryAuthorizer {
    fn to_authorizer(&self) -> Authorizer {
        Authorizer {
            id: self.id.clone(),
            name: self.name.clone(),
            function_arn: FunctionArn::from_invoke_uri(&self.uri).map(|f| f.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryApi {
    name: String,
    resources: BTreeMap<String, MemoryResource>,
    authorizers: BTreeMap<String, MemoryAuthorizer>,
    deployments: Vec<String>,
}

impl MemoryApi {
    fn resource_mut(&mut self, op: &str, id: &str) -> RemoteResult<&mut MemoryResource> {
        self.resources
            .get_mut(id)
            .ok_or_else(|| RemoteError::not_found(op, format!("Invalid resource identifier {}", id)))
    }

    fn method_mut(&mut self, op: &str, resource_id: &str, method: HttpMethod) -> RemoteResult<&mut MethodRecord> {
        self.resource_mut(op, resource_id)?
            .methods
            .get_mut(&method)
            .ok_or_else(|| RemoteError::not_found(op, format!("Invalid method {} on {}", method, resource_id)))
    }

    fn by_path(&self, path: &str) -> Option<&MemoryResource> {
        self.resources.values().find(|r| r.path == path)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    apis: BTreeMap<String, MemoryApi>,
    grants: BTreeMap<(String, String), InvokeGrant>,
    next_id: u64,
    calls: HashMap<String, usize>,
    faults: HashMap<String, VecDeque<RemoteErrorKind>>,
}

impl MemoryState {
    /// Record the call and surface an injected fault, if any
    fn enter(&mut self, op: &str) -> RemoteResult<()> {
        *self.calls.entry(op.to_string()).or_default() += 1;
        if let Some(kind) = self.faults.get_mut(op).and_then(|q| q.pop_front()) {
            debug!(operation = op, kind = ?kind, "Injected fault");
            return Err(RemoteError::new(kind, op, "Injected fault"));
        }
        Ok(())
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn api_mut(&mut self, op: &str, api_id: &str) -> RemoteResult<&mut MemoryApi> {
        self.apis
            .get_mut(api_id)
            .ok_or_else(|| RemoteError::not_found(op, format!("Invalid API identifier {}", api_id)))
    }

    fn api(&self, op: &str, api_id: &str) -> RemoteResult<&MemoryApi> {
        self.apis
            .get(api_id)
            .ok_or_else(|| RemoteError::not_found(op, format!("Invalid API identifier {}", api_id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<MemoryState>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `operation` with `kind`
    pub fn inject_fault(&self, operation: &str, kind: RemoteErrorKind) {
        self.inject_faults(operation, kind, 1);
    }

    pub fn inject_faults(&self, operation: &str, kind: RemoteErrorKind, times: usize) {
        let mut state = self.state.lock();
        let queue = state.faults.entry(operation.to_string()).or_default();
        queue.extend(std::iter::repeat(kind).take(times));
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn has_api(&self, api_id: &str) -> bool {
        self.state.lock().apis.contains_key(api_id)
    }

    pub fn resources(&self, api_id: &str) -> Vec<ResourceNode> {
        let state = self.state.lock();
        state
            .apis
            .get(api_id)
            .map(|api| api.resources.values().map(MemoryResource::to_node).collect())
            .unwrap_or_default()
    }

    pub fn node_at(&self, api_id: &str, path: &str) -> Option<ResourceNode> {
        let state = self.state.lock();
        state.apis.get(api_id)?.by_path(path).map(MemoryResource::to_node)
    }

    pub fn method_at(&self, api_id: &str, path: &str, method: HttpMethod) -> Option<MethodRecord> {
        let state = self.state.lock();
        state.apis.get(api_id)?.by_path(path)?.methods.get(&method).cloned()
    }

    pub fn authorizers(&self, api_id: &str) -> Vec<Authorizer> {
        let state = self.state.lock();
        state
            .apis
            .get(api_id)
            .map(|api| api.authorizers.values().map(MemoryAuthorizer::to_authorizer).collect())
            .unwrap_or_default()
    }

    pub fn grants(&self) -> Vec<InvokeGrant> {
        self.state.lock().grants.values().cloned().collect()
    }

    pub fn deployments(&self, api_id: &str) -> Vec<String> {
        let state = self.state.lock();
        state.apis.get(api_id).map(|api| api.deployments.clone()).unwrap_or_default()
    }

    /// Bind a method at `path` directly, creating missing nodes, without
    /// counting calls. Stands in for resources another tool created.
    pub fn seed_method(&self, api_id: &str, resource_path: &str, method: HttpMethod) {
        let mut state = self.state.lock();
        let mut parent_id = match state.apis.get(api_id).and_then(|api| api.by_path(path::ROOT)) {
            Some(root) => root.id.clone(),
            None => return,
        };
        let mut current = path::ROOT.to_string();

        for segment in path::segments(resource_path).map(str::to_string).collect::<Vec<_>>() {
            current = path::join(&current, &segment);
            let existing = state.apis.get(api_id).and_then(|api| api.by_path(&current)).map(|r| r.id.clone());
            parent_id = match existing {
                Some(id) => id,
                None => {
                    let id = state.next_id("r");
                    let resource = MemoryResource {
                        id: id.clone(),
                        parent_id: Some(parent_id),
                        path_part: Some(segment),
                        path: current.clone(),
                        methods: BTreeMap::new(),
                    };
                    if let Some(api) = state.apis.get_mut(api_id) {
                        api.resources.insert(id.clone(), resource);
                    }
                    id
                }
            };
        }

        if let Some(resource) = state.apis.get_mut(api_id).and_then(|api| api.resources.get_mut(&parent_id)) {
            resource.methods.insert(
                method,
                MethodRecord {
                    authorization: MethodAuthorization::None,
                    api_key_required: false,
                    request_parameters: BTreeMap::new(),
                    integration: None,
                },
            );
        }
    }
}

#[async_trait]
impl RestApiClient for InMemoryGateway {
    async fn find_rest_api(&self, name: &str) -> RemoteResult<Option<String>> {
        let mut state = self.state.lock();
        state.enter("GetRestApis")?;
        Ok(state
            .apis
            .iter()
            .find(|(_, api)| api.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn create_rest_api(&self, name: &str) -> RemoteResult<String> {
        let mut state = self.state.lock();
        state.enter("CreateRestApi")?;

        let api_id = state.next_id("api");
        let root_id = state.next_id("r");
        let mut api = MemoryApi {
            name: name.to_string(),
            ..Default::default()
        };
        api.resources.insert(
            root_id.clone(),
            MemoryResource {
                id: root_id,
                parent_id: None,
                path_part: None,
                path: path::ROOT.to_string(),
                methods: BTreeMap::new(),
            },
        );
        state.apis.insert(api_id.clone(), api);
        Ok(api_id)
    }

    async fn delete_rest_api(&self, api_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.enter("DeleteRestApi")?;
        state
            .apis
            .remove(api_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found("DeleteRestApi", format!("Invalid API identifier {}", api_id)))
    }

    async fn get_resources(&self, api_id: &str) -> RemoteResult<Vec<ResourceNode>> {
        let mut state = self.state.lock();
        state.enter("GetResources")?;
        let api = state.api("GetResources", api_id)?;
        Ok(api.resources.values().map(MemoryResource::to_node).collect())
    }

    async fn create_resource(&self, api_id: &str, parent_id: &str, path_part: &str) -> RemoteResult<ResourceNode> {
        const OP: &str = "CreateResource";
        let mut state = self.state.lock();
        state.enter(OP)?;
        let id = state.next_id("r");

        let api = state.api_mut(OP, api_id)?;
        let parent_path = api.resource_mut(OP, parent_id)?.path.clone();
        let taken = api
            .resources
            .values()
            .any(|r| r.parent_id.as_deref() == Some(parent_id) && r.path_part.as_deref() == Some(path_part));
        if taken {
            return Err(RemoteError::conflict(
                OP,
                "Another resource with the same parent already has this name",
            ));
        }

        let resource = MemoryResource {
            id: id.clone(),
            parent_id: Some(parent_id.to_string()),
            path_part: Some(path_part.to_string()),
            path: path::join(&parent_path, path_part),
            methods: BTreeMap::new(),
        };
        let node = resource.to_node();
        api.resources.insert(id, resource);
        Ok(node)
    }

    async fn delete_resource(&self, api_id: &str, resource_id: &str) -> RemoteResult<()> {
        const OP: &str = "DeleteResource";
        let mut state = self.state.lock();
        state.enter(OP)?;

        let api = state.api_mut(OP, api_id)?;
        let target_path = api.resource_mut(OP, resource_id)?.path.clone();
        if target_path == path::ROOT {
            return Err(RemoteError::other(OP, "Cannot delete the root resource"));
        }

        let prefix = format!("{}/", target_path);
        api.resources
            .retain(|_, r| r.path != target_path && !r.path.starts_with(&prefix));
        Ok(())
    }

    async fn put_method(&self, api_id: &str, request: &PutMethodRequest) -> RemoteResult<()> {
        const OP: &str = "PutMethod";
        let mut state = self.state.lock();
        state.enter(OP)?;

        let api = state.api_mut(OP, api_id)?;
        if let Some(authorizer_id) = request.authorization.authorizer_id() {
            if !api.authorizers.contains_key(authorizer_id) {
                return Err(RemoteError::other(OP, format!("Invalid authorizer ID {}", authorizer_id)));
            }
        }

        let resource = api.resource_mut(OP, &request.resource_id)?;
        if resource.methods.contains_key(&request.method) {
            return Err(RemoteError::conflict(OP, "Method already exists for this resource"));
        }
        resource.methods.insert(
            request.method,
            MethodRecord {
                authorization: request.authorization.clone(),
                api_key_required: request.api_key_required,
                request_parameters: request.request_parameters.clone(),
                integration: None,
            },
        );
        Ok(())
    }

    async fn update_method_authorization(
        &self,
        api_id: &str,
        resource_id: &str,
        method: HttpMethod,
        authorization: &MethodAuthorization,
    ) -> RemoteResult<()> {
        const OP: &str = "UpdateMethod";
        let mut state = self.state.lock();
        state.enter(OP)?;

        let api = state.api_mut(OP, api_id)?;
        if let Some(authorizer_id) = authorization.authorizer_id() {
            if !api.authorizers.contains_key(authorizer_id) {
                return Err(RemoteError::other(OP, format!("Invalid authorizer ID {}", authorizer_id)));
            }
        }
        api.method_mut(OP, resource_id, method)?.authorization = authorization.clone();
        Ok(())
    }

    async fn delete_method(&self, api_id: &str, resource_id: &str, method: HttpMethod) -> RemoteResult<()> {
        const OP: &str = "DeleteMethod";
        let mut state = self.state.lock();
        state.enter(OP)?;

        let api = state.api_mut(OP, api_id)?;
        api.resource_mut(OP, resource_id)?
            .methods
            .remove(&method)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(OP, format!("Invalid method {} on {}", method, resource_id)))
    }

    async fn put_integration(&self, api_id: &str, request: &PutIntegrationRequest) -> RemoteResult<()> {
        const OP: &str = "PutIntegration";
        let mut state = self.state.lock();
        state.enter(OP)?;

        let api = state.api_mut(OP, api_id)?;
        api.method_mut(OP, &request.resource_id, request.method)?.integration = Some(request.clone());
        Ok(())
    }

    async fn get_authorizers(&self, api_id: &str) -> RemoteResult<Vec<Authorizer>> {
        let mut state = self.state.lock();
        state.enter("GetAuthorizers")?;
        let api = state.api("GetAuthorizers", api_id)?;
        Ok(api.authorizers.values().map(MemoryAuthorizer::to_authorizer).collect())
    }

    async fn create_authorizer(&self, api_id: &str, request: &CreateAuthorizerRequest) -> RemoteResult<Authorizer> {
        const OP: &str = "CreateAuthorizer";
        let mut state = self.state.lock();
        state.enter(OP)?;
        let id = state.next_id("a");

        let api = state.api_mut(OP, api_id)?;
        let authorizer = MemoryAuthorizer {
            id: id.clone(),
            name: request.name.clone(),
            uri: request.authorizer_uri.clone(),
        };
        let out = authorizer.to_authorizer();
        api.authorizers.insert(id, authorizer);
        Ok(out)
    }

    async fn delete_authorizer(&self, api_id: &str, authorizer_id: &str) -> RemoteResult<()> {
        const OP: &str = "DeleteAuthorizer";
        let mut state = self.state.lock();
        state.enter(OP)?;

        let api = state.api_mut(OP, api_id)?;
        if !api.authorizers.contains_key(authorizer_id) {
            return Err(RemoteError::not_found(OP, format!("Invalid authorizer ID {}", authorizer_id)));
        }
        let in_use = api
            .resources
            .values()
            .flat_map(|r| r.methods.values())
            .any(|m| m.authorization.authorizer_id() == Some(authorizer_id));
        if in_use {
            return Err(RemoteError::conflict(OP, "Cannot delete authorizer, is referenced in method"));
        }
        api.authorizers.remove(authorizer_id);
        Ok(())
    }

    async fn create_deployment(&self, api_id: &str, stage: &str) -> RemoteResult<String> {
        const OP: &str = "CreateDeployment";
        let mut state = self.state.lock();
        state.enter(OP)?;
        let id = state.next_id("d");

        let api = state.api_mut(OP, api_id)?;
        let has_methods = api.resources.values().any(|r| !r.methods.is_empty());
        if !has_methods {
            return Err(RemoteError::other(OP, "The REST API doesn't contain any methods"));
        }
        api.deployments.push(stage.to_string());
        Ok(id)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl PermissionClient for InMemoryGateway {
    async fn grant_invoke(&self, grant: &InvokeGrant) -> RemoteResult<()> {
        const OP: &str = "AddPermission";
        let mut state = self.state.lock();
        state.enter(OP)?;

        let key = (grant.function_arn.clone(), grant.statement_id.clone());
        if state.grants.contains_key(&key) {
            return Err(RemoteError::already_exists(
                OP,
                format!("The statement id ({}) provided already exists", grant.statement_id),
            ));
        }
        state.grants.insert(key, grant.clone());
        Ok(())
    }
}
