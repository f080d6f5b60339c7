//! Wire envelope for routed requests

use super::{RouteError, RouteOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Inbound route request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<RouteHints>,
}

impl RouteRequest {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
            hints: None,
        }
    }

    pub fn prefer(mut self, agent: impl Into<String>) -> Self {
        self.hints.get_or_insert_with(RouteHints::default).preferred_agent = Some(agent.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.hints.get_or_insert_with(RouteHints::default).timeout_ms = Some(timeout_ms);
        self
    }

    pub fn preferred_agent(&self) -> Option<&str> {
        self.hints.as_ref()?.preferred_agent.as_deref()
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.hints.as_ref()?.timeout_ms
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub processing_time_ms: u64,
    pub routing_confidence: f64,
    /// Agent the request was dispatched to, absent when routing failed
    pub routed_to: Option<String>,
}

/// Normalized response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub request_id: Uuid,
    pub agent: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResponseMetadata,
}

impl From<RouteOutcome> for RouteResponse {
    fn from(outcome: RouteOutcome) -> Self {
        Self {
            request_id: outcome.request_id,
            agent: Some(outcome.target_agent.clone()),
            success: true,
            data: Some(outcome.response),
            error: None,
            metadata: ResponseMetadata {
                processing_time_ms: outcome.latency_ms,
                routing_confidence: outcome.confidence,
                routed_to: Some(outcome.target_agent),
            },
        }
    }
}

impl From<&RouteError> for RouteResponse {
    fn from(err: &RouteError) -> Self {
        Self {
            request_id: err.request_id,
            agent: err.agent.clone(),
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: err.source.code().to_string(),
                message: err.source.to_string(),
            }),
            metadata: ResponseMetadata {
                processing_time_ms: err.processing_time_ms,
                routing_confidence: err.confidence,
                routed_to: err.agent.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let req: RouteRequest = serde_json::from_value(json!({
            "action": "assign_bed",
            "payload": {"patientId": "p-1"},
            "hints": {"preferredAgent": "bed-manager", "timeoutMs": 500}
        }))
        .unwrap();

        assert_eq!(req.preferred_agent(), Some("bed-manager"));
        assert_eq!(req.timeout_ms(), Some(500));

        let bare: RouteRequest = serde_json::from_value(json!({"action": "x"})).unwrap();
        assert!(bare.payload.is_null());
        assert_eq!(bare.preferred_agent(), None);
    }

    #[test]
    fn test_success_envelope() {
        let outcome = RouteOutcome {
            request_id: Uuid::nil(),
            target_agent: "bed-manager".to_string(),
            response: json!({"bed": "4B-12"}),
            confidence: 0.7,
            latency_ms: 12,
        };
        let value = serde_json::to_value(RouteResponse::from(outcome)).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["bed"], "4B-12");
        assert_eq!(value["metadata"]["routedTo"], "bed-manager");
        assert_eq!(value["metadata"]["processingTimeMs"], 12);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_error_envelope() {
        let err = RouteError {
            request_id: Uuid::nil(),
            agent: None,
            confidence: 0.1,
            processing_time_ms: 1,
            source: OrchestratorError::NoConfidentMatch {
                best_confidence: 0.1,
                required: 0.3,
            },
        };
        let value = serde_json::to_value(RouteResponse::from(&err)).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "no_confident_match");
        assert!(value["metadata"]["routedTo"].is_null());
    }
}
