mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::json;

use common::{FakeEngine, MockService, client_for, spawn_service};
use webui_bridge::error::BridgeError;
use webui_bridge::functions::{FunctionKind, FunctionPayload, FunctionRegistry};

async fn registry_for(mock: &Arc<MockService>) -> FunctionRegistry {
    let port = spawn_service(mock.clone()).await;
    FunctionRegistry::new(client_for(port, FakeEngine::new()))
}

fn dmr(local: bool, global: bool) -> serde_json::Value {
    json!({
        "id": "docker_model_runner",
        "name": "Docker Model Runner",
        "type": "manifold",
        "is_active": local,
        "is_global": global,
    })
}

#[tokio::test]
async fn test_list_normalizes_and_caches() {
    let mock = MockService::new()
        .with_function(dmr(true, false))
        .with_function(json!({ "id": "summarizer", "meta": { "enabled": "true" } }))
        .with_function(json!({ "name": "no id" }));
    let registry = registry_for(&mock).await;

    let functions = registry.list_functions().await;
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0].kind, FunctionKind::Manifold);
    assert!(functions[0].local_active && !functions[0].global_active);
    assert_eq!(functions[1].kind, FunctionKind::Pipe);
    assert!(FunctionRegistry::is_function_active(&functions[1]));

    registry.list_functions().await;
    assert_eq!(MockService::count(&mock.exports), 1);

    registry.invalidate().await;
    registry.list_functions().await;
    assert_eq!(MockService::count(&mock.exports), 2);
}

#[tokio::test]
async fn test_list_failure_reads_as_empty() {
    let mock = MockService::new().with_function(dmr(true, true));
    mock.always_unauthorized.store(true, Ordering::SeqCst);
    let registry = registry_for(&mock).await;

    assert!(registry.list_functions().await.is_empty());
    assert!(!registry.is_installed("docker_model_runner").await);
}

#[tokio::test]
async fn test_enable_from_fully_inactive_toggles_both() {
    let mock = MockService::new().with_function(dmr(false, false));
    let registry = registry_for(&mock).await;

    let outcome = registry.ensure_function_enabled("docker_model_runner", true).await;

    assert!(outcome.found);
    assert!(outcome.converged());
    assert_eq!(outcome.toggles, 2);
    assert_eq!(MockService::count(&mock.local_toggles), 1);
    assert_eq!(MockService::count(&mock.global_toggles), 1);
}

#[tokio::test]
async fn test_enable_when_already_active_is_noop() {
    let mock = MockService::new().with_function(dmr(true, true));
    let registry = registry_for(&mock).await;

    let outcome = registry.ensure_function_enabled("docker_model_runner", true).await;

    assert!(outcome.converged());
    assert_eq!(outcome.toggles, 0);
    assert_eq!(MockService::count(&mock.local_toggles), 0);
    assert_eq!(MockService::count(&mock.global_toggles), 0);
}

#[tokio::test]
async fn test_enable_toggles_only_the_differing_flag() {
    let mock = MockService::new().with_function(dmr(true, false));
    let registry = registry_for(&mock).await;

    let outcome = registry.ensure_function_enabled("docker_model_runner", true).await;

    assert!(outcome.converged());
    assert_eq!(outcome.toggles, 1);
    assert_eq!(MockService::count(&mock.local_toggles), 0);
    assert_eq!(MockService::count(&mock.global_toggles), 1);
}

#[tokio::test]
async fn test_disable_drives_flags_down() {
    let mock = MockService::new().with_function(dmr(true, true));
    let registry = registry_for(&mock).await;

    let outcome = registry.ensure_function_enabled("docker_model_runner", false).await;

    assert!(outcome.converged());
    assert!(!outcome.local_active && !outcome.global_active);
}

#[tokio::test]
async fn test_ignored_toggles_report_non_convergence() {
    let mock = MockService::new().with_function(dmr(false, false));
    mock.toggles_ignored.store(true, Ordering::SeqCst);
    let registry = registry_for(&mock).await;

    let outcome = registry.ensure_function_enabled("docker_model_runner", true).await;

    assert!(outcome.found);
    assert!(!outcome.converged());
    assert_eq!(MockService::count(&mock.local_toggles), 1);
    assert_eq!(MockService::count(&mock.global_toggles), 1);
}

#[tokio::test]
async fn test_stuck_global_flag_is_not_converged() {
    let mock = MockService::new().with_function(dmr(false, false));
    mock.global_toggles_ignored.store(true, Ordering::SeqCst);
    let registry = registry_for(&mock).await;

    let outcome = registry.ensure_function_enabled("docker_model_runner", true).await;

    assert!(outcome.local_active);
    assert!(!outcome.global_active);
    assert!(!outcome.converged());
}

#[tokio::test]
async fn test_enable_missing_function() {
    let mock = MockService::new();
    let registry = registry_for(&mock).await;

    let outcome = registry.ensure_function_enabled("docker_model_runner", true).await;

    assert!(!outcome.found);
    assert!(!outcome.converged());
    assert_eq!(MockService::count(&mock.local_toggles), 0);
}

#[tokio::test]
async fn test_install_then_listed() {
    let mock = MockService::new();
    let registry = registry_for(&mock).await;
    assert!(!registry.is_installed("docker_model_runner").await);

    registry
        .install_function(&FunctionPayload::docker_model_runner())
        .await
        .unwrap();

    assert_eq!(MockService::count(&mock.creates), 1);
    let installed = registry.find("docker_model_runner").await.unwrap();
    assert_eq!(installed.kind, FunctionKind::Manifold);
    assert!(!FunctionRegistry::is_function_active(&installed));
}

#[tokio::test]
async fn test_install_accepts_plain_acknowledgement() {
    let mock = MockService::new();
    *mock.create_response.lock().unwrap() = Some((200, "OK".to_string()));
    let registry = registry_for(&mock).await;

    registry
        .install_function(&FunctionPayload::docker_model_runner())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_install_rejects_unacknowledged_json() {
    let mock = MockService::new();
    *mock.create_response.lock().unwrap() = Some((200, "{\"success\": false}".to_string()));
    let registry = registry_for(&mock).await;

    let err = registry
        .install_function(&FunctionPayload::docker_model_runner())
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::InvalidPayload(_)));
}

#[tokio::test]
async fn test_install_rejects_empty_content() {
    let mock = MockService::new();
    let registry = registry_for(&mock).await;
    let payload = FunctionPayload {
        content: "   ".to_string(),
        ..FunctionPayload::docker_model_runner()
    };

    let err = registry.install_function(&payload).await.unwrap_err();

    assert!(matches!(err, BridgeError::InvalidPayload(_)));
    assert_eq!(MockService::count(&mock.creates), 0);
}

#[tokio::test]
async fn test_install_http_error_invalidates_cache() {
    let mock = MockService::new();
    *mock.create_response.lock().unwrap() = Some((400, "{\"detail\":\"bad\"}".to_string()));
    let registry = registry_for(&mock).await;
    registry.list_functions().await;

    let err = registry
        .install_function(&FunctionPayload::docker_model_runner())
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Http { status: 400, .. }));
    registry.list_functions().await;
    assert_eq!(MockService::count(&mock.exports), 2);
}
