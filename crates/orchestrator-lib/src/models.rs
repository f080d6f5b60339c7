//! Core data models shared by the router, the health monitor and the bridge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Endpoint scheme for agents served in-process
pub const LOCAL_SCHEME: &str = "local://";

/// Default number of consecutive non-healthy polls before an incident opens
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Default poll interval per agent
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default per-agent probe timeout
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;

/// Agent category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    System,
    Domain,
    Integration,
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentCategory::System => write!(f, "system"),
            AgentCategory::Domain => write!(f, "domain"),
            AgentCategory::Integration => write!(f, "integration"),
        }
    }
}

/// Identity of a routable, monitorable backend service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub category: AgentCategory,
    pub endpoint: String,
    #[serde(default)]
    pub is_critical: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Liveness path appended to the endpoint
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Hard timeout for a single probe
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

impl AgentDescriptor {
    pub fn new(
        name: impl Into<String>,
        category: AgentCategory,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            endpoint: endpoint.into(),
            is_critical: false,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            health_path: default_health_path(),
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            description: None,
        }
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// True when the agent is served in-process (`local://name`)
    pub fn is_local(&self) -> bool {
        self.endpoint.starts_with(LOCAL_SCHEME)
    }

    /// Name of the in-process handler for a local endpoint
    pub fn local_handler(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix(LOCAL_SCHEME)
            .map(|rest| rest.trim_end_matches('/'))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Failure threshold, never below one
    pub fn failure_threshold(&self) -> u32 {
        self.max_consecutive_failures.max(1)
    }

    /// Full liveness URL for remote agents
    pub fn health_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        if self.health_path.starts_with('/') {
            format!("{}{}", base, self.health_path)
        } else {
            format!("{}/{}", base, self.health_path)
        }
    }
}

/// Outcome class of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unreachable,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Degraded agents stay routable, unhealthy and unreachable ones do not
    pub fn is_routable(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll outcome. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub agent_name: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn new(
        agent_name: impl Into<String>,
        status: HealthStatus,
        response_time_ms: u64,
        error_message: Option<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            status,
            response_time_ms,
            error_message,
            checked_at: Utc::now(),
        }
    }

    pub fn healthy(agent_name: impl Into<String>, response_time_ms: u64) -> Self {
        Self::new(agent_name, HealthStatus::Healthy, response_time_ms, None)
    }

    pub fn unreachable(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(agent_name, HealthStatus::Unreachable, 0, Some(message.into()))
    }

    pub fn at(mut self, checked_at: DateTime<Utc>) -> Self {
        self.checked_at = checked_at;
        self
    }
}

/// Incident classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Failure,
    Timeout,
    Degraded,
    Recovered,
}

impl IncidentType {
    /// Incident type implied by a non-healthy poll
    pub fn for_status(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Unreachable => IncidentType::Timeout,
            HealthStatus::Degraded => IncidentType::Degraded,
            HealthStatus::Unhealthy | HealthStatus::Healthy => IncidentType::Failure,
        }
    }
}

/// Severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl Severity {
    /// Severity of an incident for `agent` reporting `status`
    pub fn for_agent(agent: &AgentDescriptor, status: HealthStatus) -> Self {
        if agent.is_critical {
            return Severity::Critical;
        }
        match status {
            HealthStatus::Unhealthy | HealthStatus::Unreachable => Severity::High,
            HealthStatus::Degraded => Severity::Medium,
            HealthStatus::Healthy => Severity::Low,
        }
    }
}

/// A bounded span of abnormal agent behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub agent_name: String,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub message: String,
    /// Consecutive non-healthy polls when the incident opened
    pub failure_count: u32,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Duration of the incident, up to `now` while still open
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.resolved_at.unwrap_or(now) - self.opened_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_from_config() {
        let json = r#"{"name":"bed-manager","category":"domain","endpoint":"http://beds:8080"}"#;
        let agent: AgentDescriptor = serde_json::from_str(json).unwrap();

        assert_eq!(agent.max_consecutive_failures, 3);
        assert_eq!(agent.poll_interval_secs, 60);
        assert!(!agent.is_critical);
        assert_eq!(agent.health_url(), "http://beds:8080/health");
    }

    #[test]
    fn test_local_endpoint() {
        let agent = AgentDescriptor::new("capacity", AgentCategory::System, "local://capacity");
        assert!(agent.is_local());
        assert_eq!(agent.local_handler(), Some("capacity"));

        let remote = AgentDescriptor::new("fhir", AgentCategory::Integration, "http://fhir/");
        assert!(!remote.is_local());
        assert_eq!(remote.health_url(), "http://fhir/health");
    }

    #[test]
    fn test_severity_for_agent() {
        let regular = AgentDescriptor::new("x", AgentCategory::Domain, "http://x");
        let critical = regular.clone().critical();

        assert_eq!(Severity::for_agent(&regular, HealthStatus::Unhealthy), Severity::High);
        assert_eq!(Severity::for_agent(&regular, HealthStatus::Unreachable), Severity::High);
        assert_eq!(Severity::for_agent(&regular, HealthStatus::Degraded), Severity::Medium);
        assert_eq!(Severity::for_agent(&critical, HealthStatus::Degraded), Severity::Critical);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_routability() {
        assert!(HealthStatus::Healthy.is_routable());
        assert!(HealthStatus::Degraded.is_routable());
        assert!(!HealthStatus::Unhealthy.is_routable());
        assert!(!HealthStatus::Unreachable.is_routable());
    }

    #[test]
    fn test_failure_threshold_never_zero() {
        let agent =
            AgentDescriptor::new("x", AgentCategory::Domain, "http://x").with_max_consecutive_failures(0);
        assert_eq!(agent.failure_threshold(), 1);
    }
}
