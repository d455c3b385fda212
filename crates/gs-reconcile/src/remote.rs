//! Throttled view of the control plane
//!
//! Every call the reconciler makes goes through [`Remote`], which submits it
//! to the shared scheduler. Nothing in this crate holds a client directly.

use std::sync::Arc;

use gs_common::{Authorizer, HttpMethod, RemoteResult, ResourceNode};
use gs_gateway::{
    CreateAuthorizerRequest, InvokeGrant, MethodAuthorization, PermissionClient, PutIntegrationRequest,
    PutMethodRequest, RestApiClient,
};
use gs_scheduler::Scheduler;

#[derive(Clone)]
pub struct Remote {
    api: Arc<dyn RestApiClient>,
    permissions: Arc<dyn PermissionClient>,
    scheduler: Scheduler,
}

impl Remote {
    pub fn new(api: Arc<dyn RestApiClient>, permissions: Arc<dyn PermissionClient>, scheduler: Scheduler) -> Self {
        Self {
            api,
            permissions,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn backend(&self) -> &str {
        self.api.name()
    }

    pub async fn find_rest_api(&self, name: &str) -> RemoteResult<Option<String>> {
        let api = &self.api;
        self.scheduler.submit("GetRestApis", || api.find_rest_api(name)).await
    }

    pub async fn create_rest_api(&self, name: &str) -> RemoteResult<String> {
        let api = &self.api;
        self.scheduler.submit("CreateRestApi", || api.create_rest_api(name)).await
    }

    pub async fn delete_rest_api(&self, api_id: &str) -> RemoteResult<()> {
        let api = &self.api;
        self.scheduler.submit("DeleteRestApi", || api.delete_rest_api(api_id)).await
    }

    pub async fn get_resources(&self, api_id: &str) -> RemoteResult<Vec<ResourceNode>> {
        let api = &self.api;
        self.scheduler.submit("GetResources", || api.get_resources(api_id)).await
    }

    pub async fn create_resource(&self, api_id: &str, parent_id: &str, path_part: &str) -> RemoteResult<ResourceNode> {
        let api = &self.api;
        self.scheduler
            .submit("CreateResource", || api.create_resource(api_id, parent_id, path_part))
            .await
    }

    pub async fn delete_resource(&self, api_id: &str, resource_id: &str) -> RemoteResult<()> {
        let api = &self.api;
        self.scheduler
            .submit("DeleteResource", || api.delete_resource(api_id, resource_id))
            .await
    }

    pub async fn put_method(&self, api_id: &str, request: &PutMethodRequest) -> RemoteResult<()> {
        let api = &self.api;
        self.scheduler.submit("PutMethod", || api.put_method(api_id, request)).await
    }

    pub async fn update_method_authorization(
        &self,
        api_id: &str,
        resource_id: &str,
        method: HttpMethod,
        authorization: &MethodAuthorization,
    ) -> RemoteResult<()> {
        let api = &self.api;
        self.scheduler
            .submit("UpdateMethod", || {
                api.update_method_authorization(api_id, resource_id, method, authorization)
            })
            .await
    }

    pub async fn delete_method(&self, api_id: &str, resource_id: &str, method: HttpMethod) -> RemoteResult<()> {
        let api = &self.api;
        self.scheduler
            .submit("DeleteMethod", || api.delete_method(api_id, resource_id, method))
            .await
    }

    pub async fn put_integration(&self, api_id: &str, request: &PutIntegrationRequest) -> RemoteResult<()> {
        let api = &self.api;
        self.scheduler
            .submit("PutIntegration", || api.put_integration(api_id, request))
            .await
    }

    pub async fn get_authorizers(&self, api_id: &str) -> RemoteResult<Vec<Authorizer>> {
        let api = &self.api;
        self.scheduler.submit("GetAuthorizers", || api.get_authorizers(api_id)).await
    }

    pub async fn create_authorizer(&self, api_id: &str, request: &CreateAuthorizerRequest) -> RemoteResult<Authorizer> {
        let api = &self.api;
        self.scheduler
            .submit("CreateAuthorizer", || api.create_authorizer(api_id, request))
            .await
    }

    pub async fn delete_authorizer(&self, api_id: &str, authorizer_id: &str) -> RemoteResult<()> {
        let api = &self.api;
        self.scheduler
            .submit("DeleteAuthorizer", || api.delete_authorizer(api_id, authorizer_id))
            .await
    }

    pub async fn create_deployment(&self, api_id: &str, stage: &str) -> RemoteResult<String> {
        let api = &self.api;
        self.scheduler
            .submit("CreateDeployment", || api.create_deployment(api_id, stage))
            .await
    }

    pub async fn grant_invoke(&self, grant: &InvokeGrant) -> RemoteResult<()> {
        let permissions = &self.permissions;
        self.scheduler
            .submit("AddPermission", || permissions.grant_invoke(grant))
            .await
    }
}
