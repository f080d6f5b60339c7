//! Integration tests for the orchestrator API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use orchestrator_lib::{
    api::{create_router, AppState},
    datasource::{DataSnapshot, InMemoryDataSource, UnitSnapshot},
    health::{components, HealthRegistry},
    models::{AgentCategory, AgentDescriptor},
    monitor::{HealthMonitor, HttpProbe, MonitorConfig},
    notify::{BridgeConfig, IncidentBridge, LogSink},
    predictor::{
        capacity_descriptor, capacity_rules, CapacityAgent, CapacityEngine, PredictorConfig,
    },
    registry::AgentRegistry,
    router::{
        EndpointDispatcher, HttpDispatcher, LocalHandler, Router as AgentRouter, RouterConfig,
        RoutingRule, RoutingTable,
    },
    Result,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Local agent that echoes its payload back
struct EchoAgent;

#[async_trait]
impl LocalHandler for EchoAgent {
    async fn handle(&self, action: &str, payload: &Value) -> Result<Value> {
        Ok(json!({"action": action, "echo": payload}))
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let registry = Arc::new(
        AgentRegistry::from_descriptors(vec![
            capacity_descriptor(),
            AgentDescriptor::new("echo", AgentCategory::Integration, "local://echo"),
        ])
        .unwrap(),
    );

    let source = InMemoryDataSource::new(DataSnapshot {
        units: vec![UnitSnapshot {
            unit_id: "icu".to_string(),
            facility_id: "north".to_string(),
            name: "ICU".to_string(),
            capacity: 100,
            occupied: 93,
        }],
        ..Default::default()
    });
    let engine =
        Arc::new(CapacityEngine::new(Arc::new(source), PredictorConfig::default()).unwrap());

    let bridge = Arc::new(IncidentBridge::new(
        Arc::new(LogSink),
        BridgeConfig::default(),
    ));
    let monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        Arc::new(HttpProbe::new().unwrap()),
        bridge,
        MonitorConfig::default(),
    ));

    let mut rules = capacity_rules();
    rules.push(RoutingRule::new("echo").pattern("echo").pattern("re:^ping"));
    let dispatcher = EndpointDispatcher::new(HttpDispatcher::new(Duration::from_secs(5)).unwrap())
        .with_local("capacity", Arc::new(CapacityAgent::new(engine.clone())))
        .with_local("echo", Arc::new(EchoAgent));
    let router = Arc::new(AgentRouter::new(
        registry.clone(),
        monitor.clone(),
        Arc::new(dispatcher),
        RoutingTable::compile(&rules).unwrap(),
        RouterConfig::default(),
    ));

    let state = Arc::new(AppState {
        router,
        monitor,
        engine,
        registry,
        health_registry: HealthRegistry::with_default_components().await,
        shutdown: CancellationToken::new(),
    });
    (create_router(state.clone()), state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read(response).await
}

async fn send(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read(response).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_route_dispatches_to_capacity_agent() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(
        app,
        "POST",
        "/route",
        json!({"action": "predict_los", "payload": {"category": "sepsis"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["agent"], "capacity");
    assert_eq!(body["data"]["predictedHours"], 144.0);
    assert!(body["requestId"].is_string());
    assert!(body["metadata"]["routingConfidence"].as_f64().unwrap() >= 0.3);
}

#[tokio::test]
async fn test_route_honours_preferred_agent() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(
        app,
        "POST",
        "/route",
        json!({
            "action": "predict_los",
            "payload": {"category": "sepsis"},
            "hints": {"preferredAgent": "echo"}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent"], "echo");
    assert_eq!(body["data"]["echo"]["category"], "sepsis");
    assert_eq!(body["metadata"]["routingConfidence"], 1.0);
}

#[tokio::test]
async fn test_route_without_match_returns_error_envelope() {
    let (app, state) = setup_test_app().await;

    let (status, body) = send(
        app,
        "POST",
        "/route",
        json!({"action": "order_lunch", "payload": {"menu": "soup"}}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "no_confident_match");

    let history = state.router.history(10).await;
    assert_eq!(history[0].outcome, "no_confident_match");
}

#[tokio::test]
async fn test_classify_does_not_dispatch() {
    let (app, state) = setup_test_app().await;

    let (status, body) = send(app, "POST", "/route/classify", json!({"action": "ping"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["targetAgent"], "echo");
    assert_eq!(body["reason"], "rule_match");
    assert!(state.router.history(10).await.is_empty());
}

#[tokio::test]
async fn test_health_invocations() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(app.clone(), "POST", "/health", json!({"action": "check_all"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["healthy"], 2);

    let (status, body) = send(app.clone(), "POST", "/health", json!({"action": "check_one"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(
        app,
        "POST",
        "/health",
        json!({"action": "check_one", "agentName": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_agent");
}

#[tokio::test]
async fn test_predict_endpoints() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(
        app.clone(),
        "POST",
        "/predict/surge",
        json!({"facilityId": "north"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], "critical");

    let (status, body) = send(
        app.clone(),
        "POST",
        "/predict/surge",
        json!({"facilityId": "east"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_facility");

    let (status, body) = send(
        app.clone(),
        "POST",
        "/predict/forecast",
        json!({"unitId": "nicu", "horizonHours": 6}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_unit");

    let (status, body) = send(
        app.clone(),
        "POST",
        "/predict/forecast",
        json!({"unitId": "icu", "horizonHours": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(app, "POST", "/predict/los", json!({"category": "unknown-thing"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["insufficientHistory"], true);
}

#[tokio::test]
async fn test_agent_administration() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = send(
        app.clone(),
        "POST",
        "/agents",
        json!({"name": "transport", "category": "domain", "endpoint": "http://transport:8080"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = get(app.clone(), "/agents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, body) = send(app.clone(), "DELETE", "/agents/transport", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "transport");

    let (status, body) = send(app, "DELETE", "/agents/transport", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_agent");
}

#[tokio::test]
async fn test_update_agent_descriptor() {
    let (app, state) = setup_test_app().await;

    let (status, body) = send(
        app.clone(),
        "PUT",
        "/agents/echo",
        json!({
            "name": "echo",
            "category": "integration",
            "endpoint": "local://echo",
            "is_critical": true,
            "max_consecutive_failures": 5
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_critical"], true);

    let updated = state.registry.get("echo").unwrap();
    assert!(updated.is_critical);
    assert_eq!(updated.max_consecutive_failures, 5);

    let (status, body) = send(
        app.clone(),
        "PUT",
        "/agents/echo",
        json!({"name": "other", "category": "integration", "endpoint": "local://echo"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = send(
        app,
        "PUT",
        "/agents/transport",
        json!({"name": "transport", "category": "domain", "endpoint": "http://transport:8080"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_agent");
}

#[tokio::test]
async fn test_incidents_empty_by_default() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/incidents").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["open"].as_array().unwrap().is_empty());
    assert!(body["recentlyResolved"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::MONITOR, "1 of 2 agents are down")
        .await;

    let (status, body) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert!(body["components"]["router"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::MONITOR, "all 2 agents are down")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_startup() {
    let (app, state) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    send(app.clone(), "POST", "/route", json!({"action": "ping"})).await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("orchestrator_route_latency_seconds_bucket"));
    assert!(metrics_text.contains("orchestrator_routes_total"));
}
