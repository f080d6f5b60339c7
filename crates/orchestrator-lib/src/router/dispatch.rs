//! Dispatch of routed requests to agents
//!
//! Remote agents receive the request as a JSON POST on their endpoint.
//! Agents registered with a `local://name` endpoint are served by an
//! in-process [`LocalHandler`].

use crate::error::{OrchestratorError, Result};
use crate::models::AgentDescriptor;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Body posted to a downstream agent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub request_id: Uuid,
    pub action: String,
    pub payload: Value,
}

/// Sends a routed request to an agent and returns its response body
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(&self, agent: &AgentDescriptor, request: &DispatchRequest) -> Result<Value>;
}

/// Operations served in-process for a `local://` agent
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn handle(&self, action: &str, payload: &Value) -> Result<Value>;
}

/// JSON-over-HTTP dispatcher
///
/// The overall deadline is enforced by the router; the client timeout here
/// is only a backstop for a dispatcher used on its own.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new(backstop_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(backstop_timeout)
            .build()
            .map_err(|e| OrchestratorError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentDispatcher for HttpDispatcher {
    async fn dispatch(&self, agent: &AgentDescriptor, request: &DispatchRequest) -> Result<Value> {
        debug!(agent = %agent.name, action = %request.action, "Dispatching over HTTP");

        let response = self
            .client
            .post(&agent.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_transport_error(agent, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(agent, e))?;

        if !status.is_success() {
            return Err(OrchestratorError::UpstreamStatus {
                agent: agent.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

fn classify_transport_error(agent: &AgentDescriptor, err: reqwest::Error) -> OrchestratorError {
    if err.is_timeout() {
        OrchestratorError::UpstreamTimeout {
            agent: agent.name.clone(),
            timeout_ms: agent.timeout_ms,
        }
    } else {
        OrchestratorError::UpstreamUnreachable {
            agent: agent.name.clone(),
            reason: err.to_string(),
        }
    }
}

/// Dispatcher that picks the transport from the agent endpoint
pub struct EndpointDispatcher {
    http: HttpDispatcher,
    local: HashMap<String, Arc<dyn LocalHandler>>,
}

impl EndpointDispatcher {
    pub fn new(http: HttpDispatcher) -> Self {
        Self {
            http,
            local: HashMap::new(),
        }
    }

    /// Serve `local://{name}` with `handler`
    pub fn with_local(mut self, name: impl Into<String>, handler: Arc<dyn LocalHandler>) -> Self {
        self.local.insert(name.into(), handler);
        self
    }
}

#[async_trait]
impl AgentDispatcher for EndpointDispatcher {
    async fn dispatch(&self, agent: &AgentDescriptor, request: &DispatchRequest) -> Result<Value> {
        match agent.local_handler() {
            Some(name) => {
                let handler = self.local.get(name).ok_or_else(|| {
                    OrchestratorError::UpstreamUnreachable {
                        agent: agent.name.clone(),
                        reason: format!("no in-process handler named '{}'", name),
                    }
                })?;
                handler.handle(&request.action, &request.payload).await
            }
            None => self.http.dispatch(agent, request).await,
        }
    }
}
