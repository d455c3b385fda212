//! Reconciliation runs against the in-memory control plane

use std::sync::Arc;
use std::time::Duration;

use gs_common::{EndpointKey, FunctionArn, HttpMethod, ReconciliationState, RemoteErrorKind};
use gs_gateway::{
    CreateAuthorizerRequest, InMemoryGateway, IntegrationKind, MethodAuthorization, RestApiClient,
    AUTHORIZER_IDENTITY_SOURCE,
};
use gs_reconcile::paths::PathResolver;
use gs_reconcile::{
    authorizer, ReconcileError, Reconciler, ReconcilerConfig, Remote, ResourceTree, ValidationContext,
};
use gs_scheduler::Scheduler;
use serde_json::{json, Value};
use tokio_test::assert_ok;

const USERS_FN: &str = "arn:aws:lambda:us-east-1:123456789012:function:users";
const AUTH_FN: &str = "arn:aws:lambda:us-east-1:123456789012:function:auth";
const OTHER_ACCOUNT_AUTH_FN: &str = "arn:aws:lambda:us-east-1:999999999999:function:auth";

fn reconciler(gateway: &Arc<InMemoryGateway>) -> Reconciler {
    Reconciler::new(
        gateway.clone(),
        gateway.clone(),
        Scheduler::default(),
        ReconcilerConfig::default(),
    )
}

async fn setup() -> (Arc<InMemoryGateway>, Reconciler, ValidationContext) {
    let gateway = Arc::new(InMemoryGateway::new());
    let reconciler = reconciler(&gateway);
    let api_id = reconciler.ensure_rest_api("test-api").await.unwrap();
    (gateway, reconciler, ValidationContext::new(api_id, "prod", "us-east-1"))
}

fn key(method: HttpMethod, path: &str) -> EndpointKey {
    EndpointKey::new(method, path)
}

fn authorizer_name(function: &str) -> String {
    function.parse::<FunctionArn>().unwrap().authorizer_name()
}

#[tokio::test(start_paused = true)]
async fn test_single_endpoint_creates_chain() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![json!({"method": "get", "path": "users", "function": USERS_FN})];

    let outcome = assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    let paths: Vec<String> = gateway.resources(&ctx.api_id).into_iter().map(|n| n.path).collect();
    assert_eq!(paths.len(), 2);
    assert!(paths.contains(&"/".to_string()));
    assert!(paths.contains(&"/users".to_string()));

    let node = gateway.node_at(&ctx.api_id, "/users").unwrap();
    let method = gateway.method_at(&ctx.api_id, "/users", HttpMethod::Get).unwrap();
    assert_eq!(method.authorization, MethodAuthorization::None);
    assert!(matches!(
        method.integration.unwrap().kind,
        IntegrationKind::FunctionProxy { .. }
    ));
    assert_eq!(gateway.call_count("PutMethod"), 1);
    assert_eq!(gateway.call_count("PutIntegration"), 1);
    assert_eq!(gateway.grants().len(), 1);

    let endpoint = &outcome.state.endpoints[0];
    assert_eq!(endpoint.id.as_deref(), Some(node.id.as_str()));
    assert!(endpoint.url.as_deref().unwrap().ends_with("/prod/users"));
    assert_eq!(outcome.state.rest_api_id.as_deref(), Some(ctx.api_id.as_str()));
    assert!(outcome.removed.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_root_endpoints_bind_to_root() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![
        json!({"method": "GET", "path": "/"}),
        json!({"method": "POST", "path": "/"}),
    ];

    let outcome = assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    let root = gateway.node_at(&ctx.api_id, "/").unwrap();
    assert_eq!(gateway.resources(&ctx.api_id).len(), 1);
    assert_eq!(gateway.call_count("CreateResource"), 0);
    for endpoint in &outcome.state.endpoints {
        assert_eq!(endpoint.id.as_deref(), Some(root.id.as_str()));
    }
    let method = gateway.method_at(&ctx.api_id, "/", HttpMethod::Post).unwrap();
    assert_eq!(method.integration.unwrap().kind, IntegrationKind::Mock);
}

#[tokio::test(start_paused = true)]
async fn test_shared_prefix_converges_on_one_ancestor() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![
        json!({"method": "GET", "path": "/orders/open"}),
        json!({"method": "GET", "path": "/orders/closed"}),
        json!({"method": "POST", "path": "/orders"}),
    ];

    assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    // One node per distinct path, "/orders" created once
    assert_eq!(gateway.call_count("CreateResource"), 3);
    let orders = gateway.node_at(&ctx.api_id, "/orders").unwrap();
    let open = gateway.node_at(&ctx.api_id, "/orders/open").unwrap();
    let closed = gateway.node_at(&ctx.api_id, "/orders/closed").unwrap();
    assert_eq!(open.parent_id.as_deref(), Some(orders.id.as_str()));
    assert_eq!(closed.parent_id.as_deref(), Some(orders.id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_rerun_is_idempotent() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![
        json!({"method": "GET", "path": "/users", "function": USERS_FN}),
        json!({"method": "GET", "path": "/users/{id}", "function": USERS_FN, "authorizer": AUTH_FN}),
    ];

    let first = assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);
    let resources_before = gateway.resources(&ctx.api_id).len();
    let creates_before = gateway.call_count("CreateResource");

    let second = assert_ok!(reconciler.reconcile(&ctx, &desired, &first.state).await);

    assert_eq!(gateway.resources(&ctx.api_id).len(), resources_before);
    assert_eq!(gateway.call_count("CreateResource"), creates_before);
    assert_eq!(gateway.call_count("CreateAuthorizer"), 1);
    assert_eq!(gateway.authorizers(&ctx.api_id).len(), 1);
    assert!(second.removed.is_empty());
    assert_eq!(first.state.endpoints.len(), second.state.endpoints.len());
    for (a, b) in first.state.endpoints.iter().zip(&second.state.endpoints) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.authorizer_id, b.authorizer_id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_endpoint_removed_shared_authorizer_kept() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![
        json!({"method": "GET", "path": "/users", "function": USERS_FN, "authorizer": AUTH_FN}),
        json!({"method": "GET", "path": "/old", "function": USERS_FN, "authorizer": AUTH_FN}),
    ];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    let second = vec![json!({"method": "GET", "path": "/users", "function": USERS_FN, "authorizer": AUTH_FN})];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    assert_eq!(outcome.removed, vec![key(HttpMethod::Get, "/old")]);
    assert!(gateway.node_at(&ctx.api_id, "/old").is_none());
    assert!(gateway.method_at(&ctx.api_id, "/users", HttpMethod::Get).is_some());

    let authorizers = gateway.authorizers(&ctx.api_id);
    assert_eq!(authorizers.len(), 1);
    assert_eq!(gateway.call_count("DeleteAuthorizer"), 0);
    assert_eq!(outcome.state.endpoints[0].authorizer_id.as_deref(), Some(authorizers[0].id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_orphaned_branches_pruned_bottom_up() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![
        json!({"method": "GET", "path": "/old/deep/leaf"}),
        json!({"method": "GET", "path": "/keep/child"}),
        json!({"method": "GET", "path": "/keep"}),
    ];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    let second = vec![json!({"method": "GET", "path": "/keep"})];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    assert_eq!(outcome.removed.len(), 2);
    for gone in ["/old", "/old/deep", "/old/deep/leaf", "/keep/child"] {
        assert!(gateway.node_at(&ctx.api_id, gone).is_none(), "{} should be removed", gone);
    }
    assert!(gateway.node_at(&ctx.api_id, "/keep").is_some());
    assert_eq!(gateway.resources(&ctx.api_id).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_gc_never_removes_nodes_hosting_foreign_methods() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![json!({"method": "GET", "path": "/shared/mine"})];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    // Another consumer binds a method on the shared ancestor
    gateway.seed_method(&ctx.api_id, "/shared", HttpMethod::Post);

    let outcome = assert_ok!(reconciler.reconcile(&ctx, &[], &prior).await);

    assert_eq!(outcome.removed, vec![key(HttpMethod::Get, "/shared/mine")]);
    assert!(gateway.node_at(&ctx.api_id, "/shared/mine").is_none());
    assert!(gateway.method_at(&ctx.api_id, "/shared", HttpMethod::Post).is_some());
    assert!(outcome.state.endpoints.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_foreign_method_conflict_aborts_before_writes() {
    let (gateway, reconciler, ctx) = setup().await;
    gateway.seed_method(&ctx.api_id, "/users", HttpMethod::Get);
    let desired = vec![
        json!({"method": "POST", "path": "/orders"}),
        json!({"method": "GET", "path": "/users"}),
    ];

    let err = reconciler
        .reconcile(&ctx, &desired, &ReconciliationState::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::EndpointConflict { key: k } if k == key(HttpMethod::Get, "/users")));
    assert_eq!(gateway.call_count("CreateResource"), 0);
    assert_eq!(gateway.call_count("PutMethod"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_declaration_aborts_before_any_call() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![
        json!({"method": "GET", "path": "/ok"}),
        json!({"method": "GET", "path": ""}),
    ];

    let err = reconciler
        .reconcile(&ctx, &desired, &ReconciliationState::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::InvalidEndpointSpec(_)));
    assert_eq!(gateway.call_count("GetResources"), 0);
    assert_eq!(gateway.call_count("CreateResource"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_calls_are_retried() {
    let (gateway, reconciler, ctx) = setup().await;
    gateway.inject_faults("PutMethod", RemoteErrorKind::RateLimited, 4);
    let desired = vec![json!({"method": "GET", "path": "/users"})];

    assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    assert_eq!(gateway.call_count("PutMethod"), 5);
    assert!(gateway.method_at(&ctx.api_id, "/users", HttpMethod::Get).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_endpoint_skips_gc_and_keeps_ownership() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![json!({"method": "GET", "path": "/old"})];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    // The first resource created this run is "/a"
    gateway.inject_fault("CreateResource", RemoteErrorKind::Other);
    let desired = vec![
        json!({"method": "GET", "path": "/a"}),
        json!({"method": "GET", "path": "/b"}),
    ];

    let err = reconciler.reconcile(&ctx, &desired, &prior).await.unwrap_err();
    let ReconcileError::Partial { state, failures } = err else {
        panic!("expected a partial failure, got {:?}", err);
    };

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, key(HttpMethod::Get, "/a"));
    assert!(matches!(failures[0].error, ReconcileError::PathResolution { .. }));

    assert!(state.owns(&key(HttpMethod::Get, "/b")));
    assert!(state.owns(&key(HttpMethod::Get, "/old")));
    assert!(!state.owns(&key(HttpMethod::Get, "/a")));
    // Garbage collection did not run
    assert!(gateway.node_at(&ctx.api_id, "/old").is_some());

    // A clean re-run from the partial state converges
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &desired, &state).await);
    assert_eq!(outcome.removed, vec![key(HttpMethod::Get, "/old")]);
    assert!(gateway.node_at(&ctx.api_id, "/a").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_method_removal_failure_keeps_stale_endpoint_owned() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![
        json!({"method": "GET", "path": "/users"}),
        json!({"method": "GET", "path": "/old"}),
    ];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    gateway.inject_fault("DeleteMethod", RemoteErrorKind::Other);
    let second = vec![json!({"method": "GET", "path": "/users"})];

    let err = reconciler.reconcile(&ctx, &second, &prior).await.unwrap_err();
    let ReconcileError::Partial { state, failures } = err else {
        panic!("expected a partial failure, got {:?}", err);
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, key(HttpMethod::Get, "/old"));
    assert_eq!(failures[0].error.remote().map(|e| e.kind), Some(RemoteErrorKind::Other));
    assert!(state.owns(&key(HttpMethod::Get, "/users")));
    assert!(state.owns(&key(HttpMethod::Get, "/old")));
    assert!(gateway.method_at(&ctx.api_id, "/old", HttpMethod::Get).is_some());

    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &state).await);
    assert_eq!(outcome.removed, vec![key(HttpMethod::Get, "/old")]);
    assert!(gateway.node_at(&ctx.api_id, "/old").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_authorizer_removal_failure_is_retried_next_run() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![json!({"method": "GET", "path": "/users", "authorizer": AUTH_FN})];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    gateway.inject_fault("DeleteAuthorizer", RemoteErrorKind::Other);
    let second = vec![json!({"method": "GET", "path": "/users"})];

    let err = reconciler.reconcile(&ctx, &second, &prior).await.unwrap_err();
    let ReconcileError::Partial { state, failures } = err else {
        panic!("expected a partial failure, got {:?}", err);
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].key, key(HttpMethod::Get, "/users"));
    // Still recorded, so the next run knows the authorizer is ours to remove
    assert_eq!(state.endpoints[0].authorizer_id, prior.endpoints[0].authorizer_id);
    assert_eq!(gateway.authorizers(&ctx.api_id).len(), 1);

    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &state).await);
    assert!(gateway.authorizers(&ctx.api_id).is_empty());
    assert!(outcome.state.endpoints[0].authorizer_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_missing_method_counts_as_removed() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![
        json!({"method": "GET", "path": "/users"}),
        json!({"method": "GET", "path": "/old"}),
    ];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    gateway.inject_fault("DeleteMethod", RemoteErrorKind::NotFound);
    let second = vec![json!({"method": "GET", "path": "/users"})];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    assert_eq!(outcome.removed, vec![key(HttpMethod::Get, "/old")]);
    assert_eq!(gateway.call_count("DeleteMethod"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resource_pruning_stops_when_deletes_find_nothing() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![
        json!({"method": "GET", "path": "/users"}),
        json!({"method": "GET", "path": "/old/leaf"}),
    ];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    // The listing keeps showing a node every delete reports as gone
    gateway.inject_faults("DeleteResource", RemoteErrorKind::NotFound, 10);
    let second = vec![json!({"method": "GET", "path": "/users"})];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    assert_eq!(outcome.removed, vec![key(HttpMethod::Get, "/old/leaf")]);
    assert_eq!(gateway.call_count("DeleteResource"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_integration_conflict_retried_after_cooldown() {
    let (gateway, reconciler, ctx) = setup().await;
    gateway.inject_faults("PutIntegration", RemoteErrorKind::Conflict, 2);
    let desired = vec![json!({"method": "GET", "path": "/users", "function": USERS_FN})];
    let started = tokio::time::Instant::now();

    assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    assert_eq!(gateway.call_count("PutIntegration"), 3);
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_integration_conflict_budget_is_bounded() {
    let (gateway, reconciler, ctx) = setup().await;
    gateway.inject_faults("PutIntegration", RemoteErrorKind::Conflict, 10);
    let desired = vec![json!({"method": "GET", "path": "/users", "function": USERS_FN})];

    let err = reconciler
        .reconcile(&ctx, &desired, &ReconciliationState::default())
        .await
        .unwrap_err();

    let ReconcileError::Partial { state, failures } = err else {
        panic!("expected a partial failure, got {:?}", err);
    };
    assert_eq!(gateway.call_count("PutIntegration"), 4);
    assert_eq!(failures[0].error.remote().map(|e| e.kind), Some(RemoteErrorKind::Conflict));
    // The method was created, so the endpoint stays owned
    assert!(state.owns(&key(HttpMethod::Get, "/users")));
}

#[tokio::test(start_paused = true)]
async fn test_authorizer_shared_by_endpoints() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![
        json!({"method": "GET", "path": "/a", "authorizer": AUTH_FN}),
        json!({"method": "GET", "path": "/b", "authorizer": AUTH_FN}),
    ];

    let outcome = assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    let authorizers = gateway.authorizers(&ctx.api_id);
    assert_eq!(authorizers.len(), 1);
    assert_eq!(authorizers[0].name, authorizer_name(AUTH_FN));
    assert_eq!(authorizers[0].function_arn.as_deref(), Some(AUTH_FN));
    assert_eq!(gateway.call_count("GetAuthorizers"), 1);

    let expected = MethodAuthorization::Custom {
        authorizer_id: authorizers[0].id.clone(),
    };
    for path in ["/a", "/b"] {
        let method = gateway.method_at(&ctx.api_id, path, HttpMethod::Get).unwrap();
        assert_eq!(method.authorization, expected);
    }
    assert!(outcome
        .state
        .endpoints
        .iter()
        .all(|e| e.authorizer_id.as_deref() == Some(authorizers[0].id.as_str())));
    // Invoke grant for the authorizer function
    assert_eq!(gateway.grants().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreferenced_authorizer_detached() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![json!({"method": "GET", "path": "/users", "authorizer": AUTH_FN})];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    let second = vec![json!({"method": "GET", "path": "/users"})];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    assert!(gateway.authorizers(&ctx.api_id).is_empty());
    let method = gateway.method_at(&ctx.api_id, "/users", HttpMethod::Get).unwrap();
    assert_eq!(method.authorization, MethodAuthorization::None);
    assert!(outcome.state.endpoints[0].authorizer_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_changed_authorizer_replaces_old_one() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![json!({"method": "GET", "path": "/users", "authorizer": AUTH_FN})];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    let qualified = format!("{}:live", AUTH_FN);
    let second = vec![json!({"method": "GET", "path": "/users", "authorizer": qualified})];
    assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    // Different qualifier, different name: the old authorizer is detached
    let authorizers = gateway.authorizers(&ctx.api_id);
    assert_eq!(authorizers.len(), 1);
    assert_eq!(authorizers[0].name, authorizer_name(&qualified));
    let method = gateway.method_at(&ctx.api_id, "/users", HttpMethod::Get).unwrap();
    assert_eq!(method.authorization.authorizer_id(), Some(authorizers[0].id.as_str()));
    assert!(gateway.grants().iter().any(|g| g.function_arn == qualified));
}

#[tokio::test(start_paused = true)]
async fn test_authorizer_moved_to_other_account_is_granted() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![json!({"method": "GET", "path": "/users", "authorizer": AUTH_FN})];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    let second = vec![json!({"method": "GET", "path": "/users", "authorizer": OTHER_ACCOUNT_AUTH_FN})];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    let authorizers = gateway.authorizers(&ctx.api_id);
    assert_eq!(authorizers.len(), 1);
    assert_eq!(authorizers[0].function_arn.as_deref(), Some(OTHER_ACCOUNT_AUTH_FN));
    assert_ne!(outcome.state.endpoints[0].authorizer_id, prior.endpoints[0].authorizer_id);

    let method = gateway.method_at(&ctx.api_id, "/users", HttpMethod::Get).unwrap();
    assert_eq!(method.authorization.authorizer_id(), Some(authorizers[0].id.as_str()));
    let granted: Vec<String> = gateway.grants().into_iter().map(|g| g.function_arn).collect();
    assert!(granted.iter().any(|f| f == OTHER_ACCOUNT_AUTH_FN));
}

#[tokio::test(start_paused = true)]
async fn test_same_named_functions_get_separate_authorizers() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![
        json!({"method": "GET", "path": "/a", "authorizer": AUTH_FN}),
        json!({"method": "GET", "path": "/b", "authorizer": OTHER_ACCOUNT_AUTH_FN}),
    ];

    assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    let authorizers = gateway.authorizers(&ctx.api_id);
    assert_eq!(authorizers.len(), 2);
    for (path, function) in [("/a", AUTH_FN), ("/b", OTHER_ACCOUNT_AUTH_FN)] {
        let method = gateway.method_at(&ctx.api_id, path, HttpMethod::Get).unwrap();
        let guard = authorizers
            .iter()
            .find(|a| Some(a.id.as_str()) == method.authorization.authorizer_id())
            .unwrap();
        assert_eq!(guard.function_arn.as_deref(), Some(function));
    }
    assert_eq!(gateway.grants().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_authorizer_name_taken_by_other_function_is_a_conflict() {
    let (gateway, reconciler, ctx) = setup().await;
    let foreign = OTHER_ACCOUNT_AUTH_FN.parse::<FunctionArn>().unwrap();
    let request = CreateAuthorizerRequest {
        name: authorizer_name(AUTH_FN),
        authorizer_uri: foreign.invoke_uri(),
        identity_source: AUTHORIZER_IDENTITY_SOURCE.to_string(),
    };
    assert_ok!(gateway.create_authorizer(&ctx.api_id, &request).await);

    let desired = vec![json!({"method": "GET", "path": "/users", "authorizer": AUTH_FN})];
    let err = reconciler
        .reconcile(&ctx, &desired, &ReconciliationState::default())
        .await
        .unwrap_err();

    let ReconcileError::Partial { state, failures } = err else {
        panic!("expected a partial failure, got {:?}", err);
    };
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].error, ReconcileError::EndpointConflict { .. }));
    assert!(!state.owns(&key(HttpMethod::Get, "/users")));

    // The foreign authorizer is left exactly as it was
    let authorizers = gateway.authorizers(&ctx.api_id);
    assert_eq!(authorizers.len(), 1);
    assert_eq!(authorizers[0].function_arn.as_deref(), Some(OTHER_ACCOUNT_AUTH_FN));
    assert!(gateway.method_at(&ctx.api_id, "/users", HttpMethod::Get).is_none());
    assert!(gateway.grants().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_authorizer_removed_from_one_endpoint_while_still_shared() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![
        json!({"method": "GET", "path": "/a", "authorizer": AUTH_FN}),
        json!({"method": "GET", "path": "/b", "authorizer": AUTH_FN}),
    ];
    let prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;

    let second = vec![
        json!({"method": "GET", "path": "/a"}),
        json!({"method": "GET", "path": "/b", "authorizer": AUTH_FN}),
    ];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &second, &prior).await);

    let a = gateway.method_at(&ctx.api_id, "/a", HttpMethod::Get).unwrap();
    assert_eq!(a.authorization, MethodAuthorization::None);
    let b = gateway.method_at(&ctx.api_id, "/b", HttpMethod::Get).unwrap();
    assert!(b.authorization.authorizer_id().is_some());
    assert_eq!(gateway.authorizers(&ctx.api_id).len(), 1);

    // Once nothing uses it, the authorizer goes cleanly
    let third = vec![json!({"method": "GET", "path": "/a"}), json!({"method": "GET", "path": "/b"})];
    assert_ok!(reconciler.reconcile(&ctx, &third, &outcome.state).await);
    assert!(gateway.authorizers(&ctx.api_id).is_empty());
    let b = gateway.method_at(&ctx.api_id, "/b", HttpMethod::Get).unwrap();
    assert_eq!(b.authorization, MethodAuthorization::None);
}

#[tokio::test(start_paused = true)]
async fn test_detach_refuses_referenced_authorizer() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![json!({"method": "GET", "path": "/users", "authorizer": AUTH_FN})];
    let outcome = assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);
    let endpoint = &outcome.state.endpoints[0];
    let authorizer_id = endpoint.authorizer_id.clone().unwrap();

    let remote = Remote::new(gateway.clone(), gateway.clone(), Scheduler::default());
    let err = authorizer::detach(&remote, &ctx.api_id, &authorizer_id, &[endpoint], &outcome.state.endpoints)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::AuthorizerInUse { ref references, .. } if references == &vec![key(HttpMethod::Get, "/users")]
    ));
    assert_eq!(gateway.authorizers(&ctx.api_id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_path_resolution_accepts_concurrent_creator() {
    let (gateway, _reconciler, ctx) = setup().await;
    let root = gateway.node_at(&ctx.api_id, "/").unwrap();
    // Created after our listing was taken
    gateway.seed_method(&ctx.api_id, "/users", HttpMethod::Get);
    let winner = gateway.node_at(&ctx.api_id, "/users").unwrap();

    let remote = Remote::new(gateway.clone(), gateway.clone(), Scheduler::default());
    let mut resolver = PathResolver::new(&remote, &ctx.api_id, ResourceTree::new(vec![root]));

    let id = assert_ok!(resolver.resolve("/users").await);
    assert_eq!(id, winner.id);
    assert_eq!(gateway.resources(&ctx.api_id).len(), 2);

    // Memoized: a second resolution makes no calls
    let calls = gateway.call_count("GetResources");
    assert_eq!(assert_ok!(resolver.resolve("/users").await), winner.id);
    assert_eq!(gateway.call_count("GetResources"), calls);
}

#[tokio::test(start_paused = true)]
async fn test_path_resolution_error_surfaces() {
    let (gateway, _reconciler, ctx) = setup().await;
    gateway.inject_fault("CreateResource", RemoteErrorKind::Other);

    let remote = Remote::new(gateway.clone(), gateway.clone(), Scheduler::default());
    let mut resolver = assert_ok!(PathResolver::load(&remote, &ctx.api_id).await);
    let err = resolver.resolve("/users/{id}").await.unwrap_err();

    assert!(matches!(err, ReconcileError::PathResolution { ref path, .. } if path == "/users"));
}

#[tokio::test(start_paused = true)]
async fn test_prior_state_for_another_api_is_ignored() {
    let (gateway, reconciler, ctx) = setup().await;
    let first = vec![json!({"method": "GET", "path": "/users"})];
    let mut prior = assert_ok!(reconciler.reconcile(&ctx, &first, &ReconciliationState::default()).await).state;
    prior.rest_api_id = Some("some-other-api".to_string());

    let outcome = assert_ok!(reconciler.reconcile(&ctx, &[], &prior).await);

    assert!(outcome.removed.is_empty());
    assert!(gateway.node_at(&ctx.api_id, "/users").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_greedy_proxy_endpoint() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![json!({
        "method": "ANY",
        "path": "/files/{proxy+}",
        "proxyURI": "https://upstream.example.com/{proxy}",
        "greedyPath": "proxy",
        "apiKeyRequired": true
    })];

    assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    let method = gateway.method_at(&ctx.api_id, "/files/{proxy+}", HttpMethod::Any).unwrap();
    assert!(method.api_key_required);
    assert_eq!(method.request_parameters.get("method.request.path.proxy"), Some(&true));
    let integration = method.integration.unwrap();
    assert_eq!(
        integration.kind,
        IntegrationKind::HttpProxy {
            uri: "https://upstream.example.com/{proxy}".to_string(),
            http_method: HttpMethod::Any,
        }
    );
    assert_eq!(
        integration.request_parameters.get("integration.request.path.proxy").map(String::as_str),
        Some("method.request.path.proxy")
    );
    assert!(gateway.grants().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_api_lifecycle() {
    let gateway = Arc::new(InMemoryGateway::new());
    let reconciler = reconciler(&gateway);

    let api_id = reconciler.ensure_rest_api("orders").await.unwrap();
    assert_eq!(reconciler.ensure_rest_api("orders").await.unwrap(), api_id);
    assert_eq!(gateway.call_count("CreateRestApi"), 1);

    let ctx = ValidationContext::new(api_id.clone(), "prod", "us-east-1");
    let desired: Vec<Value> = vec![json!({"method": "GET", "path": "/health"})];
    assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);
    assert_ok!(reconciler.deploy(&api_id, "prod").await);
    assert_eq!(gateway.deployments(&api_id), vec!["prod".to_string()]);

    reconciler.teardown(&api_id).await;
    assert!(!gateway.has_api(&api_id));
    // Second teardown fails remotely and is swallowed
    reconciler.teardown(&api_id).await;
    assert_eq!(gateway.call_count("DeleteRestApi"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_all_calls_go_through_scheduler() {
    let (gateway, reconciler, ctx) = setup().await;
    let desired = vec![
        json!({"method": "GET", "path": "/a", "function": USERS_FN}),
        json!({"method": "GET", "path": "/b", "function": USERS_FN}),
    ];
    let before = reconciler.scheduler().stats().dispatched_total;

    assert_ok!(reconciler.reconcile(&ctx, &desired, &ReconciliationState::default()).await);

    let remote_calls: usize = [
        "GetResources",
        "CreateResource",
        "PutMethod",
        "PutIntegration",
        "AddPermission",
    ]
    .iter()
    .map(|op| gateway.call_count(op))
    .sum();
    let dispatched = reconciler.scheduler().stats().dispatched_total - before;
    assert_eq!(dispatched as usize, remote_calls);
    assert_eq!(reconciler.scheduler().stats().in_flight, 0);
}
