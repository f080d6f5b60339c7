//! Liveness probing and single-poll classification

use crate::error::{OrchestratorError, Result};
use crate::models::{AgentDescriptor, HealthCheckResult, HealthStatus};
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// Responses slower than this are classified as degraded
pub const SLOW_RESPONSE_THRESHOLD: Duration = Duration::from_millis(5000);

/// Raw outcome of a probe; only status code and timing are interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// `None` when no response arrived
    pub status_code: Option<u16>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn responded(status_code: u16, elapsed: Duration) -> Self {
        Self {
            status_code: Some(status_code),
            elapsed,
            error: None,
        }
    }

    pub fn no_response(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            status_code: None,
            elapsed,
            error: Some(error.into()),
        }
    }

    /// Classify into a [`HealthCheckResult`] for `agent`
    pub fn into_result(self, agent: &str, slow_threshold: Duration) -> HealthCheckResult {
        let status = classify(&self, slow_threshold);
        let error_message = match (&self.error, self.status_code) {
            (Some(e), _) => Some(e.clone()),
            (None, Some(code)) if !(200..300).contains(&code) => {
                Some(format!("liveness probe returned status {}", code))
            }
            (None, _) if status == HealthStatus::Degraded => Some(format!(
                "liveness probe took {}ms",
                self.elapsed.as_millis()
            )),
            _ => None,
        };
        HealthCheckResult::new(agent, status, self.elapsed.as_millis() as u64, error_message)
    }
}

/// healthy: 2xx within the threshold; degraded: slow 2xx, 4xx or other
/// codes; unhealthy: 5xx; unreachable: no response
pub fn classify(outcome: &ProbeOutcome, slow_threshold: Duration) -> HealthStatus {
    match outcome.status_code {
        None => HealthStatus::Unreachable,
        Some(code) if (500..600).contains(&code) => HealthStatus::Unhealthy,
        Some(code) if (200..300).contains(&code) => {
            if outcome.elapsed > slow_threshold {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            }
        }
        Some(_) => HealthStatus::Degraded,
    }
}

/// Issues liveness probes and recovery requests
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Must return within the agent's probe timeout
    async fn probe(&self, agent: &AgentDescriptor) -> ProbeOutcome;

    /// Best-effort recovery request; the default does nothing
    async fn request_recovery(&self, _agent: &AgentDescriptor) -> Result<()> {
        Ok(())
    }
}

/// HTTP GET on `{endpoint}{health_path}` with the per-agent timeout
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| OrchestratorError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, agent: &AgentDescriptor) -> ProbeOutcome {
        if agent.is_local() {
            return ProbeOutcome::responded(200, Duration::ZERO);
        }

        let start = Instant::now();
        let result = self
            .client
            .get(agent.health_url())
            .timeout(agent.probe_timeout())
            .send()
            .await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) => ProbeOutcome::responded(response.status().as_u16(), elapsed),
            Err(e) if e.is_timeout() => ProbeOutcome::no_response(
                elapsed,
                format!("no response within {}ms", agent.timeout_ms),
            ),
            Err(e) => {
                debug!(agent = %agent.name, error = %e, "Probe failed");
                ProbeOutcome::no_response(elapsed, e.to_string())
            }
        }
    }

    async fn request_recovery(&self, agent: &AgentDescriptor) -> Result<()> {
        if agent.is_local() {
            return Ok(());
        }
        let url = format!("{}/recover", agent.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(agent.probe_timeout())
            .send()
            .await
            .map_err(|e| OrchestratorError::UpstreamUnreachable {
                agent: agent.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::UpstreamStatus {
                agent: agent.name.clone(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
