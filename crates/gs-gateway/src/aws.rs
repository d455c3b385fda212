//! AWS backends
//!
//! `ApiGatewayClient` drives an API Gateway REST API through the v1 control
//! plane; `LambdaPermissionClient` adds resource policy statements to Lambda
//! functions. SDK failures are classified by error code here and nowhere else.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_apigateway::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_apigateway::types::{AuthorizerType, IntegrationType, Op, PatchOperation};
use gs_common::{Authorizer, FunctionArn, HttpMethod, RemoteError, RemoteErrorKind, RemoteResult, ResourceNode};
use tracing::{debug, info, warn};

use crate::{
    CreateAuthorizerRequest, IntegrationKind, InvokeGrant, MethodAuthorization, PermissionClient,
    PutIntegrationRequest, PutMethodRequest, RestApiClient,
};

const PAGE_SIZE: i32 = 500;

/// What a `ResourceConflictException` means for the calling service
#[derive(Debug, Clone, Copy)]
enum ConflictMeaning {
    Conflict,
    AlreadyExists,
}

fn classify<E, R>(operation: &str, err: SdkError<E, R>, conflict: ConflictMeaning) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let kind = match err.code() {
        Some("TooManyRequestsException") | Some("ThrottlingException") => RemoteErrorKind::RateLimited,
        Some("NotFoundException") | Some("ResourceNotFoundException") => RemoteErrorKind::NotFound,
        Some("ConflictException") | Some("ResourceConflictException") => match conflict {
            ConflictMeaning::Conflict => RemoteErrorKind::Conflict,
            ConflictMeaning::AlreadyExists => RemoteErrorKind::AlreadyExists,
        },
        _ => RemoteErrorKind::Other,
    };
    RemoteError::new(kind, operation, DisplayErrorContext(&err).to_string())
}

fn gateway_error<E, R>(operation: &str, err: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    classify(operation, err, ConflictMeaning::Conflict)
}

fn missing(operation: &str, field: &str) -> RemoteError {
    RemoteError::other(operation, format!("Response did not include {}", field))
}

fn replace(path: &str, value: &str) -> PatchOperation {
    PatchOperation::builder().op(Op::Replace).path(path).value(value).build()
}

fn resource_node(resource: &aws_sdk_apigateway::types::Resource) -> Option<ResourceNode> {
    let methods = resource
        .resource_methods()
        .map(|methods| {
            methods
                .keys()
                .filter_map(|m| match m.parse::<HttpMethod>() {
                    Ok(method) => Some(method),
                    Err(e) => {
                        warn!(method = %m, error = %e, "Ignoring unknown method on resource");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ResourceNode {
        id: resource.id()?.to_string(),
        path: resource.path()?.to_string(),
        parent_id: resource.parent_id().map(str::to_string),
        path_part: resource.path_part().map(str::to_string),
        methods,
    })
}

/// REST API control plane backed by `aws-sdk-apigateway`
pub struct ApiGatewayClient {
    client: aws_sdk_apigateway::Client,
}

impl ApiGatewayClient {
    pub fn new(client: aws_sdk_apigateway::Client) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_apigateway::Client::new(config))
    }
}

#[async_trait]
impl RestApiClient for ApiGatewayClient {
    async fn find_rest_api(&self, name: &str) -> RemoteResult<Option<String>> {
        const OP: &str = "GetRestApis";
        let mut position: Option<String> = None;

        loop {
            let output = self
                .client
                .get_rest_apis()
                .limit(PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(|e| gateway_error(OP, e))?;

            if let Some(api) = output.items().iter().find(|api| api.name() == Some(name)) {
                return Ok(api.id().map(str::to_string));
            }

            match output.position() {
                Some(next) if !next.is_empty() => position = Some(next.to_string()),
                _ => return Ok(None),
            }
        }
    }

    async fn create_rest_api(&self, name: &str) -> RemoteResult<String> {
        const OP: &str = "CreateRestApi";
        let output = self
            .client
            .create_rest_api()
            .name(name)
            .send()
            .await
            .map_err(|e| gateway_error(OP, e))?;

        let id = output.id().ok_or_else(|| missing(OP, "id"))?.to_string();
        info!(api_id = %id, name = %name, "Created REST API");
        Ok(id)
    }

    async fn delete_rest_api(&self, api_id: &str) -> RemoteResult<()> {
        self.client
            .delete_rest_api()
            .rest_api_id(api_id)
            .send()
            .await
            .map_err(|e| gateway_error("DeleteRestApi", e))?;
        Ok(())
    }

    async fn get_resources(&self, api_id: &str) -> RemoteResult<Vec<ResourceNode>> {
        const OP: &str = "GetResources";
        let mut nodes = Vec::new();
        let mut position: Option<String> = None;

        loop {
            let output = self
                .client
                .get_resources()
                .rest_api_id(api_id)
                .limit(PAGE_SIZE)
                .embed("methods")
                .set_position(position.take())
                .send()
                .await
                .map_err(|e| gateway_error(OP, e))?;

            nodes.extend(output.items().iter().filter_map(resource_node));

            match output.position() {
                Some(next) if !next.is_empty() => position = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(api_id = %api_id, count = nodes.len(), "Listed resources");
        Ok(nodes)
    }

    async fn create_resource(&self, api_id: &str, parent_id: &str, path_part: &str) -> RemoteResult<ResourceNode> {
        const OP: &str = "CreateResource";
        let output = self
            .client
            .create_resource()
            .rest_api_id(api_id)
            .parent_id(parent_id)
            .path_part(path_part)
            .send()
            .await
            .map_err(|e| gateway_error(OP, e))?;

        Ok(ResourceNode {
            id: output.id().ok_or_else(|| missing(OP, "id"))?.to_string(),
            path: output.path().ok_or_else(|| missing(OP, "path"))?.to_string(),
            parent_id: output.parent_id().map(str::to_string),
            path_part: output.path_part().map(str::to_string),
            methods: Default::default(),
        })
    }

    async fn delete_resource(&self, api_id: &str, resource_id: &str) -> RemoteResult<()> {
        self.client
            .delete_resource()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .send()
            .await
            .map_err(|e| gateway_error("DeleteResource", e))?;
        Ok(())
    }

    async fn put_method(&self, api_id: &str, request: &PutMethodRequest) -> RemoteResult<()> {
        let parameters: HashMap<String, bool> = request
            .request_parameters
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        self.client
            .put_method()
            .rest_api_id(api_id)
            .resource_id(&request.resource_id)
            .http_method(request.method.as_str())
            .authorization_type(request.authorization.authorization_type())
            .set_authorizer_id(request.authorization.authorizer_id().map(str::to_string))
            .api_key_required(request.api_key_required)
            .set_request_parameters((!parameters.is_empty()).then_some(parameters))
            .send()
            .await
            .map_err(|e| gateway_error("PutMethod", e))?;
        Ok(())
    }

    async fn update_method_authorization(
        &self,
        api_id: &str,
        resource_id: &str,
        method: HttpMethod,
        authorization: &MethodAuthorization,
    ) -> RemoteResult<()> {
        let mut update = self
            .client
            .update_method()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(method.as_str())
            .patch_operations(replace("/authorizationType", authorization.authorization_type()));
        if let Some(authorizer_id) = authorization.authorizer_id() {
            update = update.patch_operations(replace("/authorizerId", authorizer_id));
        }

        update.send().await.map_err(|e| gateway_error("UpdateMethod", e))?;
        Ok(())
    }

    async fn delete_method(&self, api_id: &str, resource_id: &str, method: HttpMethod) -> RemoteResult<()> {
        self.client
            .delete_method()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(method.as_str())
            .send()
            .await
            .map_err(|e| gateway_error("DeleteMethod", e))?;
        Ok(())
    }

    async fn put_integration(&self, api_id: &str, request: &PutIntegrationRequest) -> RemoteResult<()> {
        let parameters: HashMap<String, String> = request
            .request_parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut put = self
            .client
            .put_integration()
            .rest_api_id(api_id)
            .resource_id(&request.resource_id)
            .http_method(request.method.as_str())
            .set_request_parameters((!parameters.is_empty()).then_some(parameters));

        put = match &request.kind {
            IntegrationKind::FunctionProxy { uri } => put
                .r#type(IntegrationType::AwsProxy)
                .integration_http_method("POST")
                .uri(uri),
            IntegrationKind::HttpProxy { uri, http_method } => put
                .r#type(IntegrationType::HttpProxy)
                .integration_http_method(http_method.as_str())
                .uri(uri),
            IntegrationKind::Mock => put
                .r#type(IntegrationType::Mock)
                .request_templates("application/json", r#"{"statusCode": 200}"#),
        };

        put.send().await.map_err(|e| gateway_error("PutIntegration", e))?;
        Ok(())
    }

    async fn get_authorizers(&self, api_id: &str) -> RemoteResult<Vec<Authorizer>> {
        const OP: &str = "GetAuthorizers";
        let mut authorizers = Vec::new();
        let mut position: Option<String> = None;

        loop {
            let output = self
                .client
                .get_authorizers()
                .rest_api_id(api_id)
                .limit(PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(|e| gateway_error(OP, e))?;

            authorizers.extend(output.items().iter().filter_map(|a| {
                Some(Authorizer {
                    id: a.id()?.to_string(),
                    name: a.name()?.to_string(),
                    function_arn: a
                        .authorizer_uri()
                        .and_then(FunctionArn::from_invoke_uri)
                        .map(|f| f.to_string()),
                })
            }));

            match output.position() {
                Some(next) if !next.is_empty() => position = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(authorizers)
    }

    async fn create_authorizer(&self, api_id: &str, request: &CreateAuthorizerRequest) -> RemoteResult<Authorizer> {
        const OP: &str = "CreateAuthorizer";
        let output = self
            .client
            .create_authorizer()
            .rest_api_id(api_id)
            .name(&request.name)
            .r#type(AuthorizerType::Token)
            .authorizer_uri(&request.authorizer_uri)
            .identity_source(&request.identity_source)
            .send()
            .await
            .map_err(|e| gateway_error(OP, e))?;

        Ok(Authorizer {
            id: output.id().ok_or_else(|| missing(OP, "id"))?.to_string(),
            name: output.name().unwrap_or(&request.name).to_string(),
            function_arn: FunctionArn::from_invoke_uri(&request.authorizer_uri).map(|f| f.to_string()),
        })
    }

    async fn delete_authorizer(&self, api_id: &str, authorizer_id: &str) -> RemoteResult<()> {
        self.client
            .delete_authorizer()
            .rest_api_id(api_id)
            .authorizer_id(authorizer_id)
            .send()
            .await
            .map_err(|e| gateway_error("DeleteAuthorizer", e))?;
        Ok(())
    }

    async fn create_deployment(&self, api_id: &str, stage: &str) -> RemoteResult<String> {
        const OP: &str = "CreateDeployment";
        let output = self
            .client
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(stage)
            .send()
            .await
            .map_err(|e| gateway_error(OP, e))?;

        Ok(output.id().ok_or_else(|| missing(OP, "id"))?.to_string())
    }

    fn name(&self) -> &str {
        "aws-apigateway"
    }
}

/// Function permissions backed by `aws-sdk-lambda`
pub struct LambdaPermissionClient {
    client: aws_sdk_lambda::Client,
}

impl LambdaPermissionClient {
    pub fn new(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_lambda::Client::new(config))
    }
}

#[async_trait]
impl PermissionClient for LambdaPermissionClient {
    async fn grant_invoke(&self, grant: &InvokeGrant) -> RemoteResult<()> {
        self.client
            .add_permission()
            .function_name(&grant.function_arn)
            .statement_id(&grant.statement_id)
            .action("lambda:InvokeFunction")
            .principal("apigateway.amazonaws.com")
            .source_arn(&grant.source_arn)
            .send()
            .await
            .map_err(|e| classify("AddPermission", e, ConflictMeaning::AlreadyExists))?;

        debug!(function = %grant.function_arn, statement_id = %grant.statement_id, "Granted invoke permission");
        Ok(())
    }
}

/// Load shared AWS configuration, optionally pinned to `region`
pub async fn load_config(region: Option<String>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(aws_sdk_apigateway::config::Region::new(region));
    }
    loader.load().await
}
