//! Error taxonomy for routing, health monitoring and capacity prediction

use thiserror::Error;

/// Result alias used across the orchestrator library
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the orchestrator
///
/// Health check failures are never represented here: a failed poll is
/// recorded as an `unreachable` [`crate::models::HealthCheckResult`] instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Routing gave up rather than guess. Callers may retry with
    /// `hints.preferredAgent`.
    #[error("no routing rule matched with sufficient confidence (best {best_confidence:.2}, required {required:.2})")]
    NoConfidentMatch { best_confidence: f64, required: f64 },

    #[error("agent '{agent}' did not respond within {timeout_ms}ms")]
    UpstreamTimeout { agent: String, timeout_ms: u64 },

    #[error("agent '{agent}' is unreachable: {reason}")]
    UpstreamUnreachable { agent: String, reason: String },

    /// The dispatched agent answered with a non-success status
    #[error("agent '{agent}' returned status {status}: {body}")]
    UpstreamStatus {
        agent: String,
        status: u16,
        body: String,
    },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    /// Unit missing from the data source, or one with no staffed beds
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("unknown facility '{0}'")]
    UnknownFacility(String),

    /// Deregistration refused while the agent still has an open incident
    #[error("agent '{0}' is referenced by an open incident")]
    AgentInUse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    DataSource(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Stable machine-readable code used in response envelopes
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::NoConfidentMatch { .. } => "no_confident_match",
            OrchestratorError::UpstreamTimeout { .. } => "upstream_timeout",
            OrchestratorError::UpstreamUnreachable { .. } => "upstream_unreachable",
            OrchestratorError::UpstreamStatus { .. } => "upstream_status",
            OrchestratorError::UnknownAgent(_) => "unknown_agent",
            OrchestratorError::UnknownUnit(_) => "unknown_unit",
            OrchestratorError::UnknownFacility(_) => "unknown_facility",
            OrchestratorError::AgentInUse(_) => "agent_in_use",
            OrchestratorError::InvalidRequest(_) => "invalid_request",
            OrchestratorError::Config(_) => "config_error",
            OrchestratorError::DataSource(_) => "data_source_error",
        }
    }

    /// True for failures caused by the downstream agent rather than by the
    /// request or by this service
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UpstreamTimeout { .. }
                | OrchestratorError::UpstreamUnreachable { .. }
                | OrchestratorError::UpstreamStatus { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = OrchestratorError::NoConfidentMatch {
            best_confidence: 0.1,
            required: 0.3,
        };
        assert_eq!(err.code(), "no_confident_match");
        assert!(err.to_string().contains("0.10"));

        let err = OrchestratorError::UnknownAgent("bed-manager".to_string());
        assert_eq!(err.code(), "unknown_agent");
        assert!(!err.is_upstream());
    }

    #[test]
    fn test_upstream_classification() {
        let timeout = OrchestratorError::UpstreamTimeout {
            agent: "hl7-adapter".to_string(),
            timeout_ms: 30_000,
        };
        assert!(timeout.is_upstream());
        assert!(timeout.to_string().contains("30000ms"));
    }

    #[test]
    fn test_data_source_error_is_transparent() {
        let err: OrchestratorError = anyhow::anyhow!("snapshot unavailable").into();
        assert_eq!(err.code(), "data_source_error");
        assert_eq!(err.to_string(), "snapshot unavailable");
    }
}
