//! Per-agent incident state machine
//!
//! Counts consecutive non-healthy results. An incident opens when the count
//! first reaches the agent's failure threshold, is escalated when a later
//! result implies a higher severity, and resolves on the next healthy result.

use crate::models::{AgentDescriptor, HealthCheckResult, HealthStatus, Incident, IncidentType, Severity};
use uuid::Uuid;

/// A change in an agent's incident state
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentTransition {
    Opened(Incident),
    Escalated { incident: Incident, previous: Severity },
    Resolved(Incident),
}

impl IncidentTransition {
    pub fn incident(&self) -> &Incident {
        match self {
            IncidentTransition::Opened(i)
            | IncidentTransition::Escalated { incident: i, .. }
            | IncidentTransition::Resolved(i) => i,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IncidentTracker {
    consecutive_failures: u32,
    open: Option<Incident>,
}

impl IncidentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn open_incident(&self) -> Option<&Incident> {
        self.open.as_ref()
    }

    /// Feed one poll result, returning the transition it caused, if any
    pub fn observe(
        &mut self,
        agent: &AgentDescriptor,
        result: &HealthCheckResult,
    ) -> Option<IncidentTransition> {
        if result.status.is_healthy() {
            self.consecutive_failures = 0;
            return self.open.take().map(|mut incident| {
                incident.incident_type = IncidentType::Recovered;
                incident.resolved_at = Some(result.checked_at);
                incident.message = format!("Agent {} recovered", agent.name);
                IncidentTransition::Resolved(incident)
            });
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let severity = Severity::for_agent(agent, result.status);

        if let Some(open) = self.open.as_mut() {
            if severity <= open.severity {
                return None;
            }
            let previous = open.severity;
            open.severity = severity;
            open.incident_type = IncidentType::for_status(result.status);
            open.escalated_at = Some(result.checked_at);
            open.message = describe(agent, result, self.consecutive_failures);
            return Some(IncidentTransition::Escalated {
                incident: open.clone(),
                previous,
            });
        }

        if self.consecutive_failures < agent.failure_threshold() {
            return None;
        }

        let incident = Incident {
            id: Uuid::new_v4(),
            agent_name: agent.name.clone(),
            incident_type: IncidentType::for_status(result.status),
            severity,
            message: describe(agent, result, self.consecutive_failures),
            failure_count: self.consecutive_failures,
            opened_at: result.checked_at,
            escalated_at: None,
            resolved_at: None,
        };
        self.open = Some(incident.clone());
        Some(IncidentTransition::Opened(incident))
    }
}

fn describe(agent: &AgentDescriptor, result: &HealthCheckResult, failures: u32) -> String {
    let status = match result.status {
        HealthStatus::Unreachable => "unreachable",
        HealthStatus::Unhealthy => "unhealthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Healthy => "healthy",
    };
    match &result.error_message {
        Some(err) => format!(
            "Agent {} {} for {} consecutive checks: {}",
            agent.name, status, failures, err
        ),
        None => format!(
            "Agent {} {} for {} consecutive checks",
            agent.name, status, failures
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentCategory;

    fn agent() -> AgentDescriptor {
        AgentDescriptor::new("agent-x", AgentCategory::Domain, "http://x")
    }

    fn result(status: HealthStatus) -> HealthCheckResult {
        HealthCheckResult::new("agent-x", status, 5, None)
    }

    #[test]
    fn test_incident_opens_exactly_at_threshold() {
        let agent = agent();
        let mut tracker = IncidentTracker::new();

        assert!(tracker.observe(&agent, &result(HealthStatus::Healthy)).is_none());
        assert!(tracker.observe(&agent, &result(HealthStatus::Unhealthy)).is_none());
        assert!(tracker.observe(&agent, &result(HealthStatus::Unhealthy)).is_none());

        let transition = tracker
            .observe(&agent, &result(HealthStatus::Unhealthy))
            .unwrap();
        match transition {
            IncidentTransition::Opened(incident) => {
                assert_eq!(incident.severity, Severity::High);
                assert_eq!(incident.incident_type, IncidentType::Failure);
                assert_eq!(incident.failure_count, 3);
            }
            other => panic!("expected open, got {:?}", other),
        }

        // one open incident per agent
        assert!(tracker.observe(&agent, &result(HealthStatus::Unhealthy)).is_none());
        assert_eq!(tracker.consecutive_failures(), 4);
    }

    #[test]
    fn test_healthy_result_resolves_and_resets() {
        let agent = agent().with_max_consecutive_failures(1);
        let mut tracker = IncidentTracker::new();

        let opened = tracker
            .observe(&agent, &result(HealthStatus::Unreachable))
            .unwrap();
        assert_eq!(opened.incident().incident_type, IncidentType::Timeout);

        let healthy = result(HealthStatus::Healthy);
        let resolved = tracker.observe(&agent, &healthy).unwrap();
        match resolved {
            IncidentTransition::Resolved(incident) => {
                assert_eq!(incident.incident_type, IncidentType::Recovered);
                assert_eq!(incident.resolved_at, Some(healthy.checked_at));
                assert_eq!(incident.id, opened.incident().id);
            }
            other => panic!("expected resolve, got {:?}", other),
        }
        assert_eq!(tracker.consecutive_failures(), 0);
        assert!(tracker.open_incident().is_none());
    }

    #[test]
    fn test_degraded_incident_escalates_once() {
        let agent = agent().with_max_consecutive_failures(2);
        let mut tracker = IncidentTracker::new();

        tracker.observe(&agent, &result(HealthStatus::Degraded));
        let opened = tracker
            .observe(&agent, &result(HealthStatus::Degraded))
            .unwrap();
        assert_eq!(opened.incident().severity, Severity::Medium);

        let escalated = tracker
            .observe(&agent, &result(HealthStatus::Unreachable))
            .unwrap();
        match escalated {
            IncidentTransition::Escalated { incident, previous } => {
                assert_eq!(previous, Severity::Medium);
                assert_eq!(incident.severity, Severity::High);
                assert!(incident.escalated_at.is_some());
            }
            other => panic!("expected escalation, got {:?}", other),
        }

        assert!(tracker.observe(&agent, &result(HealthStatus::Unhealthy)).is_none());
        assert!(tracker.observe(&agent, &result(HealthStatus::Degraded)).is_none());
    }

    #[test]
    fn test_critical_agent_opens_critical() {
        let agent = agent().critical().with_max_consecutive_failures(1);
        let mut tracker = IncidentTracker::new();

        let opened = tracker
            .observe(&agent, &result(HealthStatus::Degraded))
            .unwrap();
        assert_eq!(opened.incident().severity, Severity::Critical);
    }

    #[test]
    fn test_counter_resets_before_threshold() {
        let agent = agent();
        let mut tracker = IncidentTracker::new();

        tracker.observe(&agent, &result(HealthStatus::Unhealthy));
        tracker.observe(&agent, &result(HealthStatus::Unhealthy));
        tracker.observe(&agent, &result(HealthStatus::Healthy));
        tracker.observe(&agent, &result(HealthStatus::Unhealthy));
        assert!(tracker.open_incident().is_none());
        assert_eq!(tracker.consecutive_failures(), 1);
    }
}
