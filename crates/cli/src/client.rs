//! API client for communicating with the orchestrator

use anyhow::{Context, Result};
use orchestrator_lib::api::{AgentView, IncidentsView};
use orchestrator_lib::router::{ErrorBody, RouteRequest, RouteResponse, RoutingDecision};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

/// Non-2xx answer from the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{code} ({status}): {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("API error ({status}): {body}")]
    Unexpected { status: StatusCode, body: String },
}

impl ClientError {
    /// Machine code when the server sent one
    #[allow(dead_code)]
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            ClientError::Unexpected { .. } => None,
        }
    }
}

/// API client for the orchestrator
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await.context("Failed to send request")
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(e) => ClientError::Api {
                    status,
                    code: e.code,
                    message: e.message,
                },
                Err(_) => ClientError::Unexpected { status, body },
            };
            return Err(err.into());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Self::parse(self.send::<()>(Method::GET, path, None).await?).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        Self::parse(self.send(Method::POST, path, Some(body)).await?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Self::parse(self.send::<()>(Method::DELETE, path, None).await?).await
    }

    /// Route a request; failed routes still come back as an envelope
    pub async fn route(&self, request: &RouteRequest) -> Result<RouteResponse> {
        let response = self.send(Method::POST, "route", Some(request)).await?;
        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        serde_json::from_str(&body).map_err(|_| ClientError::Unexpected { status, body }.into())
    }

    pub async fn classify(&self, request: &RouteRequest) -> Result<RoutingDecision> {
        self.post("route/classify", request).await
    }

    pub async fn agents(&self) -> Result<Vec<AgentView>> {
        self.get("agents").await
    }

    pub async fn incidents(&self, limit: usize) -> Result<IncidentsView> {
        self.get(&format!("incidents?limit={}", limit)).await
    }
}
