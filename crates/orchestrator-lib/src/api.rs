//! HTTP API: routing, health invocations, predictions, self-health and metrics

use crate::error::OrchestratorError;
use crate::health::{ComponentStatus, HealthRegistry};
use crate::models::{AgentDescriptor, HealthStatus, Incident};
use crate::monitor::{HealthInvocation, HealthMonitor};
use crate::predictor::{
    CapacityEngine, ForecastRequest, LosRequest, PatientRequirements, SurgeRequest,
};
use crate::registry::AgentRegistry;
use crate::router::{
    ErrorBody, HealthView, RouteRequest, RouteResponse, Router as AgentRouter, RoutingDecision,
    RoutingRecord,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<AgentRouter>,
    pub monitor: Arc<HealthMonitor>,
    pub engine: Arc<CapacityEngine>,
    pub registry: Arc<AgentRegistry>,
    pub health_registry: HealthRegistry,
    /// In-flight routes are abandoned when this fires
    pub shutdown: CancellationToken,
}

/// HTTP status for an error code
pub fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::UnknownAgent(_)
        | OrchestratorError::UnknownUnit(_)
        | OrchestratorError::UnknownFacility(_) => StatusCode::NOT_FOUND,
        OrchestratorError::AgentInUse(_) => StatusCode::CONFLICT,
        OrchestratorError::NoConfidentMatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::UpstreamUnreachable { .. } | OrchestratorError::UpstreamStatus { .. } => {
            StatusCode::BAD_GATEWAY
        }
        OrchestratorError::Config(_) | OrchestratorError::DataSource(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Error response carrying `{code, message}`
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Registered agent with its latest polled status
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
    pub status: Option<HealthStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentsView {
    pub open: Vec<Incident>,
    pub recently_resolved: Vec<Incident>,
}

/// Always answers with the route envelope; status mirrors the error code
async fn route(State(state): State<Arc<AppState>>, Json(request): Json<RouteRequest>) -> Response {
    match state.router.route_cancellable(request, &state.shutdown).await {
        Ok(outcome) => (StatusCode::OK, Json(RouteResponse::from(outcome))).into_response(),
        Err(err) => (status_for(&err.source), Json(RouteResponse::from(&err))).into_response(),
    }
}

async fn classify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteRequest>,
) -> ApiResult<RoutingDecision> {
    Ok(Json(state.router.classify(&request).await?))
}

async fn route_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<RoutingRecord>> {
    Json(state.router.history(query.limit).await)
}

async fn health_invoke(
    State(state): State<Arc<AppState>>,
    Json(invocation): Json<HealthInvocation>,
) -> ApiResult<Value> {
    Ok(Json(state.monitor.invoke(&invocation).await?))
}

async fn predict_los(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LosRequest>,
) -> ApiResult<crate::predictor::LosPrediction> {
    Ok(Json(
        state
            .engine
            .predict_los_with_sigma(&request.category, request.sigma)
            .await?,
    ))
}

async fn predict_forecast(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForecastRequest>,
) -> ApiResult<crate::predictor::CapacityForecast> {
    Ok(Json(
        state
            .engine
            .forecast_capacity(&request.unit_id, request.horizon())
            .await?,
    ))
}

async fn predict_surge(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SurgeRequest>,
) -> ApiResult<crate::predictor::SurgeStatus> {
    Ok(Json(
        state
            .engine
            .check_surge(request.facility_id.as_deref())
            .await?,
    ))
}

async fn predict_placement(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PatientRequirements>,
) -> ApiResult<Vec<crate::predictor::PlacementRecommendation>> {
    Ok(Json(state.engine.recommend_placement(&request).await?))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentView>> {
    let agents = state
        .registry
        .list()
        .into_iter()
        .map(|descriptor| AgentView {
            status: state.monitor.status_of(&descriptor.name),
            descriptor,
        })
        .collect();
    Json(agents)
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<AgentDescriptor>,
) -> Result<(StatusCode, Json<AgentDescriptor>), ApiError> {
    state.registry.register(descriptor.clone())?;
    info!(agent = %descriptor.name, "Agent registered");
    Ok((StatusCode::CREATED, Json(descriptor)))
}

async fn update_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(descriptor): Json<AgentDescriptor>,
) -> ApiResult<AgentDescriptor> {
    if descriptor.name != name {
        return Err(OrchestratorError::InvalidRequest(format!(
            "descriptor name '{}' does not match path '{}'",
            descriptor.name, name
        ))
        .into());
    }
    state.registry.update(descriptor.clone())?;
    info!(agent = %name, "Agent descriptor updated");
    Ok(Json(descriptor))
}

async fn deregister_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<AgentDescriptor> {
    let removed = state.monitor.deregister(&name).await?;
    info!(agent = %name, "Agent deregistered");
    Ok(Json(removed))
}

async fn incidents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<IncidentsView> {
    Json(IncidentsView {
        open: state.monitor.open_incidents().await,
        recently_resolved: state.monitor.resolved_incidents(query.limit).await,
    })
}

/// Returns 200 while operational, 503 when any component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/route", post(route))
        .route("/route/classify", post(classify))
        .route("/route/history", get(route_history))
        .route("/health", post(health_invoke))
        .route("/predict/los", post(predict_los))
        .route("/predict/forecast", post(predict_forecast))
        .route("/predict/surge", post(predict_surge))
        .route("/predict/placement", post(predict_placement))
        .route("/agents", get(list_agents).post(register_agent))
        .route("/agents/:name", put(update_agent).delete(deregister_agent))
        .route("/incidents", get(incidents))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}
