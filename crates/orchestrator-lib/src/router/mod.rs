//! Request classification and routing
//!
//! The router scores an operation against the compiled [`RoutingTable`],
//! picks a routable agent and dispatches the request under a per-request
//! deadline. Dispatch concurrency is bounded by a semaphore.

mod dispatch;
mod envelope;
mod rules;

pub use dispatch::{AgentDispatcher, DispatchRequest, EndpointDispatcher, HttpDispatcher, LocalHandler};
pub use envelope::{ErrorBody, ResponseMetadata, RouteHints, RouteRequest, RouteResponse};
pub use rules::{
    rank, OperationPattern, RoutingRule, RoutingTable, RuleScore, DEFAULT_MIN_CONFIDENCE,
    KEYWORD_WEIGHT, PATTERN_WEIGHT,
};

use crate::error::{OrchestratorError, Result};
use crate::models::HealthStatus;
use crate::observability::{OrchestratorMetrics, StructuredLogger};
use crate::registry::AgentRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Default dispatch deadline when the request carries no `timeoutMs` hint
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Confidence multiplier applied when the chosen agent is degraded
pub const DEGRADED_CONFIDENCE_PENALTY: f64 = 0.8;

/// Last known health of agents, as seen by the router
pub trait HealthView: Send + Sync {
    /// `None` when the agent has never been polled
    fn status_of(&self, agent: &str) -> Option<HealthStatus>;
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_timeout: Duration,
    /// Maximum concurrent dispatches
    pub max_in_flight: usize,
    /// Routing records kept for inspection
    pub history_capacity: usize,
    pub degraded_penalty: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_ROUTE_TIMEOUT,
            max_in_flight: 64,
            history_capacity: 1000,
            degraded_penalty: DEGRADED_CONFIDENCE_PENALTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    PreferredAgent,
    RuleMatch,
}

/// Outcome of classification, before dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub target_agent: String,
    pub confidence: f64,
    pub rule_index: Option<usize>,
    pub reason: DecisionReason,
    pub scores: Vec<RuleScore>,
}

/// A successfully routed request
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub request_id: Uuid,
    pub target_agent: String,
    pub response: Value,
    pub confidence: f64,
    pub latency_ms: u64,
}

/// A request that could not be routed or whose dispatch failed
#[derive(Debug, thiserror::Error)]
#[error("request {request_id} failed: {source}")]
pub struct RouteError {
    pub request_id: Uuid,
    pub agent: Option<String>,
    pub confidence: f64,
    pub processing_time_ms: u64,
    #[source]
    pub source: OrchestratorError,
}

/// Observability record kept for every routed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRecord {
    pub request_id: Uuid,
    pub action: String,
    pub agent: Option<String>,
    pub confidence: f64,
    pub processing_time_ms: u64,
    /// `success` or the error code
    pub outcome: String,
    pub recorded_at: DateTime<Utc>,
}

pub struct Router {
    registry: Arc<AgentRegistry>,
    health: Arc<dyn HealthView>,
    dispatcher: Arc<dyn AgentDispatcher>,
    table: RwLock<Arc<RoutingTable>>,
    in_flight: Semaphore,
    history: Mutex<VecDeque<RoutingRecord>>,
    config: RouterConfig,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
}

impl Router {
    pub fn new(
        registry: Arc<AgentRegistry>,
        health: Arc<dyn HealthView>,
        dispatcher: Arc<dyn AgentDispatcher>,
        table: RoutingTable,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            health,
            dispatcher,
            table: RwLock::new(Arc::new(table)),
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            config,
            metrics: OrchestratorMetrics::new(),
            logger: StructuredLogger::new("router"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub async fn rule_count(&self) -> usize {
        self.table.read().await.len()
    }

    /// Replace the routing table. Targets must be registered.
    pub async fn reload_rules(&self, rules: &[RoutingRule]) -> Result<usize> {
        let table = RoutingTable::compile(rules)?;
        table.validate_against(&self.registry)?;
        let count = table.len();
        *self.table.write().await = Arc::new(table);
        debug!(rules = count, "Routing table reloaded");
        Ok(count)
    }

    /// Decide where a request would go, without dispatching it
    pub async fn classify(&self, request: &RouteRequest) -> Result<RoutingDecision> {
        let table = self.table.read().await.clone();
        let scores = table.score_all(&request.action, &request.payload.to_string());

        if let Some(preferred) = request.preferred_agent() {
            let status = self.health.status_of(preferred);
            if self.registry.contains(preferred) && status.map_or(true, |s| s.is_healthy()) {
                return Ok(RoutingDecision {
                    target_agent: preferred.to_string(),
                    confidence: 1.0,
                    rule_index: None,
                    reason: DecisionReason::PreferredAgent,
                    scores,
                });
            }
            debug!(
                agent = %preferred,
                status = ?status,
                "Preferred agent is not available, scoring rules"
            );
        }

        let ranked = rank(&scores);
        let mut first_unroutable: Option<(String, HealthStatus)> = None;

        for candidate in &ranked {
            if !self.registry.contains(&candidate.target_agent) {
                continue;
            }
            let status = self.health.status_of(&candidate.target_agent);
            if let Some(s) = status.filter(|s| !s.is_routable()) {
                first_unroutable.get_or_insert_with(|| (candidate.target_agent.clone(), s));
                continue;
            }

            let confidence = match status {
                Some(HealthStatus::Degraded) => candidate.confidence * self.config.degraded_penalty,
                _ => candidate.confidence,
            };
            if confidence < candidate.min_confidence {
                return Err(OrchestratorError::NoConfidentMatch {
                    best_confidence: confidence,
                    required: candidate.min_confidence,
                });
            }
            return Ok(RoutingDecision {
                target_agent: candidate.target_agent.clone(),
                confidence,
                rule_index: Some(candidate.rule_index),
                reason: DecisionReason::RuleMatch,
                scores,
            });
        }

        if let Some((agent, status)) = first_unroutable {
            return Err(OrchestratorError::UpstreamUnreachable {
                reason: format!("agent is {}", status),
                agent,
            });
        }
        if let Some(candidate) = ranked.first() {
            return Err(OrchestratorError::UnknownAgent(candidate.target_agent.clone()));
        }
        Err(OrchestratorError::NoConfidentMatch {
            best_confidence: 0.0,
            required: DEFAULT_MIN_CONFIDENCE,
        })
    }

    /// Classify and dispatch a request
    pub async fn route(&self, request: RouteRequest) -> std::result::Result<RouteOutcome, RouteError> {
        self.route_cancellable(request, &CancellationToken::new()).await
    }

    /// Like [`Router::route`], abandoning the dispatch when `cancel` fires.
    /// A cancelled route reports `UpstreamTimeout` for the classified agent
    /// and its deadline.
    pub async fn route_cancellable(
        &self,
        request: RouteRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<RouteOutcome, RouteError> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        let fail = |agent: Option<String>, confidence: f64, source: OrchestratorError| RouteError {
            request_id,
            agent,
            confidence,
            processing_time_ms: start.elapsed().as_millis() as u64,
            source,
        };

        let decision = match self.classify(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                let confidence = match &e {
                    OrchestratorError::NoConfidentMatch { best_confidence, .. } => *best_confidence,
                    _ => 0.0,
                };
                let err = fail(None, confidence, e);
                self.finish_failure(&request.action, &err).await;
                return Err(err);
            }
        };

        let Some(agent) = self.registry.get(&decision.target_agent) else {
            let err = fail(
                Some(decision.target_agent.clone()),
                decision.confidence,
                OrchestratorError::UnknownAgent(decision.target_agent.clone()),
            );
            self.finish_failure(&request.action, &err).await;
            return Err(err);
        };

        let timeout = request
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);
        let dispatch_request = DispatchRequest {
            request_id,
            action: request.action.clone(),
            payload: request.payload,
        };

        let timed_out = || OrchestratorError::UpstreamTimeout {
            agent: agent.name.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        // The permit wait counts against the deadline; dropping the future on
        // timeout or cancellation cancels the in-flight call.
        let dispatch = tokio::time::timeout(timeout, async {
            let _permit = self.in_flight.acquire().await.map_err(|_| {
                OrchestratorError::UpstreamUnreachable {
                    agent: agent.name.clone(),
                    reason: "router is shutting down".to_string(),
                }
            })?;
            self.dispatcher.dispatch(&agent, &dispatch_request).await
        });
        let result = tokio::select! {
            result = dispatch => result.unwrap_or_else(|_| Err(timed_out())),
            _ = cancel.cancelled() => Err(timed_out()),
        };

        match result {
            Ok(response) => {
                let outcome = RouteOutcome {
                    request_id,
                    target_agent: agent.name.clone(),
                    response,
                    confidence: decision.confidence,
                    latency_ms: start.elapsed().as_millis() as u64,
                };
                self.finish_success(&request.action, &outcome).await;
                Ok(outcome)
            }
            Err(e) => {
                let err = fail(Some(agent.name.clone()), decision.confidence, e);
                self.finish_failure(&request.action, &err).await;
                Err(err)
            }
        }
    }

    /// Most recent routing records, newest first
    pub async fn history(&self, limit: usize) -> Vec<RoutingRecord> {
        self.history
            .lock()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    async fn finish_success(&self, action: &str, outcome: &RouteOutcome) {
        self.metrics.observe_route(
            outcome.latency_ms as f64 / 1000.0,
            outcome.confidence,
            "success",
        );
        self.logger.log_route(
            &outcome.request_id.to_string(),
            &outcome.target_agent,
            outcome.confidence,
            outcome.latency_ms,
        );
        self.record(RoutingRecord {
            request_id: outcome.request_id,
            action: action.to_string(),
            agent: Some(outcome.target_agent.clone()),
            confidence: outcome.confidence,
            processing_time_ms: outcome.latency_ms,
            outcome: "success".to_string(),
            recorded_at: Utc::now(),
        })
        .await;
    }

    async fn finish_failure(&self, action: &str, err: &RouteError) {
        let code = err.source.code();
        self.metrics
            .observe_route(err.processing_time_ms as f64 / 1000.0, err.confidence, code);
        self.logger.log_route_rejected(
            &err.request_id.to_string(),
            action,
            code,
            &err.source.to_string(),
        );
        self.record(RoutingRecord {
            request_id: err.request_id,
            action: action.to_string(),
            agent: err.agent.clone(),
            confidence: err.confidence,
            processing_time_ms: err.processing_time_ms,
            outcome: code.to_string(),
            recorded_at: Utc::now(),
        })
        .await;
    }

    async fn record(&self, record: RoutingRecord) {
        if self.config.history_capacity == 0 {
            return;
        }
        let mut history = self.history.lock().await;
        while history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(record);
    }
}
