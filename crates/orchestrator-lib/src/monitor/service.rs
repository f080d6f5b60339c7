//! Health monitor service
//!
//! Polls agents concurrently with bounded parallelism. Each agent's history
//! and incident tracker sit behind their own mutex, so updates for one agent
//! are serialized while agents proceed independently.

use super::history::{ResultHistory, WindowStats};
use super::incident::{IncidentTracker, IncidentTransition};
use super::probe::{HealthProbe, SLOW_RESPONSE_THRESHOLD};
use crate::error::{OrchestratorError, Result};
use crate::models::{AgentCategory, AgentDescriptor, HealthCheckResult, HealthStatus, Incident};
use crate::notify::IncidentBridge;
use crate::observability::{OrchestratorMetrics, StructuredLogger};
use crate::registry::AgentRegistry;
use crate::router::HealthView;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Extra time granted past the agent's own probe timeout before a check is
/// abandoned
const PROBE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Concurrent probes during a sweep
    pub max_parallel_checks: usize,
    pub slow_threshold: Duration,
    /// Resolved incidents kept for inspection
    pub resolved_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_parallel_checks: 8,
            slow_threshold: SLOW_RESPONSE_THRESHOLD,
            resolved_capacity: 200,
        }
    }
}

/// Counts of one sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unreachable: usize,
    pub total: usize,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<HealthCheckResult>,
}

impl HealthSummary {
    pub fn from_results(results: Vec<HealthCheckResult>, duration: Duration) -> Self {
        let count = |s: HealthStatus| results.iter().filter(|r| r.status == s).count();
        Self {
            healthy: count(HealthStatus::Healthy),
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
            unreachable: count(HealthStatus::Unreachable),
            total: results.len(),
            checked_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            results,
        }
    }

    /// Agents that are neither healthy nor degraded
    pub fn down(&self) -> usize {
        self.unhealthy + self.unreachable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub category: AgentCategory,
    pub is_critical: bool,
    /// `None` until the first poll
    pub status: Option<HealthStatus>,
    pub consecutive_failures: u32,
    pub last_check: Option<HealthCheckResult>,
    pub window: WindowStats,
    pub open_incident: Option<Incident>,
}

/// Aggregated 24h view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub agents: Vec<AgentStatus>,
    pub open_incidents: Vec<Incident>,
    pub recently_resolved: Vec<Incident>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub agent_name: String,
    pub recovery_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_error: Option<String>,
    pub result: HealthCheckResult,
    /// Incident closed by the re-probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_incident: Option<Incident>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_incident: Option<Incident>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthAction {
    CheckAll,
    CheckOne,
    GetStatus,
    Recover,
}

/// Health invocation `{action, agentName?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInvocation {
    pub action: HealthAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

impl HealthInvocation {
    fn require_agent(&self) -> Result<&str> {
        self.agent_name.as_deref().ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("{:?} requires agentName", self.action))
        })
    }
}

#[derive(Debug, Default)]
struct AgentState {
    tracker: IncidentTracker,
    history: ResultHistory,
}

pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    probe: Arc<dyn HealthProbe>,
    bridge: Arc<IncidentBridge>,
    config: MonitorConfig,
    states: DashMap<String, Arc<Mutex<AgentState>>>,
    latest: DashMap<String, HealthStatus>,
    last_polled: DashMap<String, Instant>,
    resolved: Mutex<VecDeque<Incident>>,
    open_count: AtomicI64,
    check_slots: Semaphore,
    shutdown: CancellationToken,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        probe: Arc<dyn HealthProbe>,
        bridge: Arc<IncidentBridge>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            bridge,
            check_slots: Semaphore::new(config.max_parallel_checks.max(1)),
            config,
            states: DashMap::new(),
            latest: DashMap::new(),
            last_polled: DashMap::new(),
            resolved: Mutex::new(VecDeque::new()),
            open_count: AtomicI64::new(0),
            shutdown: CancellationToken::new(),
            metrics: OrchestratorMetrics::new(),
            logger: StructuredLogger::new("monitor"),
        }
    }

    /// Checks in flight when `token` fires report `unreachable`
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Poll every registered agent
    pub async fn check_all(self: &Arc<Self>) -> HealthSummary {
        self.sweep(self.registry.list()).await
    }

    /// Poll the agents whose poll interval has elapsed
    pub async fn check_due(self: &Arc<Self>) -> HealthSummary {
        let due: Vec<AgentDescriptor> = self
            .registry
            .list()
            .into_iter()
            .filter(|a| {
                self.last_polled
                    .get(&a.name)
                    .map_or(true, |last| last.elapsed() >= a.poll_interval())
            })
            .collect();
        self.sweep(due).await
    }

    async fn sweep(self: &Arc<Self>, agents: Vec<AgentDescriptor>) -> HealthSummary {
        let start = Instant::now();

        let handles: Vec<_> = agents
            .into_iter()
            .map(|agent| {
                let monitor = Arc::clone(self);
                let name = agent.name.clone();
                let task = tokio::spawn(async move { monitor.check_agent(&agent).await });
                (name, task)
            })
            .collect();

        let (names, tasks): (Vec<String>, Vec<_>) = handles.into_iter().unzip();
        let joined = futures::future::join_all(tasks).await;

        let mut results = Vec::with_capacity(joined.len());
        for (name, joined) in names.into_iter().zip(joined) {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(agent = %name, error = %e, "Health check task failed");
                    let result =
                        HealthCheckResult::unreachable(&name, format!("health check aborted: {}", e));
                    if let Some(agent) = self.registry.get(&name) {
                        self.record(&agent, result.clone()).await;
                    }
                    results.push(result);
                }
            }
        }

        let summary = HealthSummary::from_results(results, start.elapsed());
        if summary.total > 0 {
            self.publish_status_gauges();
            debug!(
                total = summary.total,
                healthy = summary.healthy,
                degraded = summary.degraded,
                unhealthy = summary.unhealthy,
                unreachable = summary.unreachable,
                duration_ms = summary.duration_ms,
                "Health sweep complete"
            );
        }
        summary
    }

    /// Poll a single agent now
    pub async fn check_one(&self, agent_name: &str) -> Result<HealthCheckResult> {
        let agent = self
            .registry
            .get(agent_name)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_name.to_string()))?;
        Ok(self.check_agent(&agent).await)
    }

    async fn check_agent(&self, agent: &AgentDescriptor) -> HealthCheckResult {
        match self.probe_agent(agent).await {
            Some(result) => {
                self.record(agent, result.clone()).await;
                result
            }
            None => HealthCheckResult::unreachable(&agent.name, "health check cancelled"),
        }
    }

    /// Probe without recording; `None` when cancelled by shutdown
    async fn probe_agent(&self, agent: &AgentDescriptor) -> Option<HealthCheckResult> {
        let probe = async {
            let _slot = self.check_slots.acquire().await.ok()?;
            let deadline = agent.probe_timeout() + PROBE_GRACE;
            let start = Instant::now();
            let outcome = tokio::time::timeout(deadline, self.probe.probe(agent))
                .await
                .unwrap_or_else(|_| {
                    super::probe::ProbeOutcome::no_response(
                        start.elapsed(),
                        format!("no response within {}ms", agent.timeout_ms),
                    )
                });
            Some(outcome)
        };

        let outcome = tokio::select! {
            outcome = probe => outcome?,
            _ = self.shutdown.cancelled() => return None,
        };
        self.last_polled.insert(agent.name.clone(), Instant::now());
        self.metrics
            .observe_health_check(outcome.elapsed.as_secs_f64());
        Some(outcome.into_result(&agent.name, self.config.slow_threshold))
    }

    /// Feed a result into the agent's history and incident state machine
    pub async fn record(
        &self,
        agent: &AgentDescriptor,
        result: HealthCheckResult,
    ) -> Option<IncidentTransition> {
        let handle = self.state_handle(&agent.name);
        let mut state = handle.lock().await;

        // Deregistration holds this lock while removing the agent
        if !self.registry.contains(&agent.name) {
            drop(state);
            self.states.remove_if(&agent.name, |_, v| Arc::ptr_eq(v, &handle));
            debug!(agent = %agent.name, "Dropping result for deregistered agent");
            return None;
        }

        self.latest.insert(agent.name.clone(), result.status);
        state.history.push(result.clone());
        let transition = state.tracker.observe(agent, &result)?;

        match &transition {
            IncidentTransition::Opened(incident) => {
                self.open_count.fetch_add(1, Ordering::SeqCst);
                self.metrics.inc_incidents_opened();
                self.logger.log_incident_opened(
                    &agent.name,
                    &incident.id.to_string(),
                    &incident.severity.to_string(),
                    &incident.message,
                );
            }
            IncidentTransition::Escalated { incident, previous } => {
                self.logger.log_incident_escalated(
                    &agent.name,
                    &incident.id.to_string(),
                    &previous.to_string(),
                    &incident.severity.to_string(),
                );
            }
            IncidentTransition::Resolved(incident) => {
                self.open_count.fetch_sub(1, Ordering::SeqCst);
                self.logger.log_incident_resolved(
                    &agent.name,
                    &incident.id.to_string(),
                    incident.duration(Utc::now()).num_seconds(),
                );
                let mut resolved = self.resolved.lock().await;
                while self.config.resolved_capacity > 0
                    && resolved.len() >= self.config.resolved_capacity
                {
                    resolved.pop_front();
                }
                if self.config.resolved_capacity > 0 {
                    resolved.push_back(incident.clone());
                }
            }
        }
        self.metrics
            .set_open_incidents(self.open_count.load(Ordering::SeqCst));
        self.bridge.notify_incident(agent, &transition);

        Some(transition)
    }

    /// Ask the agent to recover, then re-probe through the normal state machine
    pub async fn recover(&self, agent_name: &str) -> Result<RecoveryResult> {
        let agent = self
            .registry
            .get(agent_name)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_name.to_string()))?;

        info!(agent = %agent.name, "Attempting agent recovery");
        let recovery_error = self
            .probe
            .request_recovery(&agent)
            .await
            .err()
            .map(|e| e.to_string());

        let result = match self.probe_agent(&agent).await {
            Some(result) => result,
            None => {
                return Err(OrchestratorError::UpstreamTimeout {
                    agent: agent.name.clone(),
                    timeout_ms: agent.timeout_ms,
                })
            }
        };
        let transition = self.record(&agent, result.clone()).await;
        let resolved_incident = match transition {
            Some(IncidentTransition::Resolved(incident)) => Some(incident),
            _ => None,
        };

        Ok(RecoveryResult {
            agent_name: agent.name.clone(),
            recovery_requested: recovery_error.is_none(),
            recovery_error,
            result,
            resolved_incident,
            open_incident: self.open_incident(&agent.name).await,
        })
    }

    pub async fn open_incident(&self, agent_name: &str) -> Option<Incident> {
        let state = self.states.get(agent_name).map(|s| s.value().clone())?;
        let state = state.lock().await;
        state.tracker.open_incident().cloned()
    }

    pub async fn open_incidents(&self) -> Vec<Incident> {
        let states: Vec<_> = self.states.iter().map(|s| s.value().clone()).collect();
        let mut open = Vec::new();
        for state in states {
            if let Some(incident) = state.lock().await.tracker.open_incident() {
                open.push(incident.clone());
            }
        }
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        open
    }

    /// Most recently resolved incidents, newest first
    pub async fn resolved_incidents(&self, limit: usize) -> Vec<Incident> {
        self.resolved
            .lock()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_status(&self) -> StatusReport {
        let mut agents = Vec::new();
        for agent in self.registry.list() {
            let state = self.states.get(&agent.name).map(|s| s.value().clone());
            let (consecutive_failures, last_check, window, open_incident) = match state {
                Some(state) => {
                    let state = state.lock().await;
                    (
                        state.tracker.consecutive_failures(),
                        state.history.latest().cloned(),
                        state.history.stats(),
                        state.tracker.open_incident().cloned(),
                    )
                }
                None => (0, None, ResultHistory::new().stats(), None),
            };
            agents.push(AgentStatus {
                status: self.status_of(&agent.name),
                name: agent.name,
                category: agent.category,
                is_critical: agent.is_critical,
                consecutive_failures,
                last_check,
                window,
                open_incident,
            });
        }

        let mut open_incidents: Vec<Incident> =
            agents.iter().filter_map(|a| a.open_incident.clone()).collect();
        open_incidents.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));

        StatusReport {
            generated_at: Utc::now(),
            agents,
            open_incidents,
            recently_resolved: self.resolved_incidents(20).await,
        }
    }

    /// Remove an agent; refused while it has an open incident
    pub async fn deregister(&self, agent_name: &str) -> Result<AgentDescriptor> {
        if !self.registry.contains(agent_name) {
            return Err(OrchestratorError::UnknownAgent(agent_name.to_string()));
        }
        let handle = self.state_handle(agent_name);
        let state = handle.lock().await;
        if state.tracker.open_incident().is_some() {
            return Err(OrchestratorError::AgentInUse(agent_name.to_string()));
        }

        let removed = self
            .registry
            .remove(agent_name)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent_name.to_string()));
        self.states.remove(agent_name);
        self.latest.remove(agent_name);
        self.last_polled.remove(agent_name);
        drop(state);
        removed
    }

    fn state_handle(&self, agent_name: &str) -> Arc<Mutex<AgentState>> {
        self.states
            .entry(agent_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AgentState::default())))
            .clone()
    }

    /// Execute a `{action, agentName?}` invocation
    pub async fn invoke(self: &Arc<Self>, invocation: &HealthInvocation) -> Result<Value> {
        let value = match invocation.action {
            HealthAction::CheckAll => serde_json::to_value(self.check_all().await),
            HealthAction::CheckOne => {
                serde_json::to_value(self.check_one(invocation.require_agent()?).await?)
            }
            HealthAction::GetStatus => serde_json::to_value(self.get_status().await),
            HealthAction::Recover => {
                serde_json::to_value(self.recover(invocation.require_agent()?).await?)
            }
        };
        value.map_err(|e| OrchestratorError::DataSource(e.into()))
    }

    fn publish_status_gauges(&self) {
        for status in [
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            HealthStatus::Unhealthy,
            HealthStatus::Unreachable,
        ] {
            let count = self.latest.iter().filter(|s| *s.value() == status).count();
            self.metrics
                .set_agents_by_status(status.as_str(), count as i64);
        }
    }
}

impl HealthView for HealthMonitor {
    fn status_of(&self, agent: &str) -> Option<HealthStatus> {
        self.latest.get(agent).map(|s| *s.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ProbeOutcome;
    use crate::notify::{BridgeConfig, ChannelSink, NotificationKind};
    use crate::models::Severity;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Plays back scripted outcomes per agent; the last one repeats
    #[derive(Default)]
    struct ScriptedProbe {
        scripts: StdMutex<std::collections::HashMap<String, VecDeque<ProbeOutcome>>>,
        recoveries: StdMutex<Vec<String>>,
        hang: bool,
    }

    impl ScriptedProbe {
        fn script(&self, agent: &str, codes: &[Option<u16>]) {
            let outcomes = codes
                .iter()
                .map(|c| match c {
                    Some(code) => ProbeOutcome::responded(*code, Duration::from_millis(3)),
                    None => ProbeOutcome::no_response(Duration::from_millis(3), "connection refused"),
                })
                .collect();
            self.scripts
                .lock()
                .unwrap()
                .insert(agent.to_string(), outcomes);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, agent: &AgentDescriptor) -> ProbeOutcome {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(agent.name.clone()).or_default();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script
                    .front()
                    .cloned()
                    .unwrap_or_else(|| ProbeOutcome::responded(200, Duration::from_millis(1)))
            }
        }

        async fn request_recovery(&self, agent: &AgentDescriptor) -> Result<()> {
            self.recoveries.lock().unwrap().push(agent.name.clone());
            Ok(())
        }
    }

    fn setup(
        agents: Vec<AgentDescriptor>,
        probe: Arc<ScriptedProbe>,
    ) -> (
        Arc<HealthMonitor>,
        tokio::sync::mpsc::UnboundedReceiver<crate::notify::Notification>,
    ) {
        let registry = Arc::new(AgentRegistry::from_descriptors(agents).unwrap());
        let (sink, rx) = ChannelSink::new();
        let bridge = Arc::new(IncidentBridge::new(Arc::new(sink), BridgeConfig::default()));
        let monitor = HealthMonitor::new(registry, probe, bridge, MonitorConfig::default());
        (Arc::new(monitor), rx)
    }

    fn agent(name: &str) -> AgentDescriptor {
        AgentDescriptor::new(name, AgentCategory::Domain, "http://agent")
    }

    #[tokio::test]
    async fn test_scenario_incident_opens_on_third_failure() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.script("agent-x", &[Some(200), Some(500), Some(500), Some(500)]);
        let (monitor, mut rx) = setup(vec![agent("agent-x")], probe);

        monitor.check_one("agent-x").await.unwrap();
        monitor.check_one("agent-x").await.unwrap();
        monitor.check_one("agent-x").await.unwrap();
        assert!(monitor.open_incidents().await.is_empty());

        let result = monitor.check_one("agent-x").await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);

        let open = monitor.open_incidents().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].severity, Severity::High);

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.kind, NotificationKind::IncidentOpened);
        assert_eq!(notification.severity, Severity::Medium);
        assert!(!notification.page);
    }

    #[tokio::test]
    async fn test_recovery_resolves_incident() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.script("agent-x", &[None, Some(200)]);
        let agent = agent("agent-x").with_max_consecutive_failures(1).critical();
        let (monitor, mut rx) = setup(vec![agent], probe.clone());

        monitor.check_one("agent-x").await.unwrap();
        let opened = rx.recv().await.unwrap();
        assert!(opened.page);

        let recovery = monitor.recover("agent-x").await.unwrap();
        assert!(recovery.recovery_requested);
        assert_eq!(recovery.result.status, HealthStatus::Healthy);
        assert!(recovery.resolved_incident.is_some());
        assert!(recovery.open_incident.is_none());
        assert_eq!(probe.recoveries.lock().unwrap().as_slice(), ["agent-x"]);

        let resolved = rx.recv().await.unwrap();
        assert_eq!(resolved.kind, NotificationKind::IncidentResolved);
        assert_eq!(monitor.resolved_incidents(5).await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_recover_fail_pages_twice() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.script("bed-manager", &[Some(500), Some(200), Some(500)]);
        let agent = agent("bed-manager").with_max_consecutive_failures(1).critical();
        let (monitor, mut rx) = setup(vec![agent], probe);

        for _ in 0..3 {
            monitor.check_one("bed-manager").await.unwrap();
        }

        let mut sent = Vec::new();
        for _ in 0..3 {
            let n = rx.recv().await.unwrap();
            sent.push((n.kind, n.page));
        }
        assert_eq!(
            sent,
            vec![
                (NotificationKind::IncidentOpened, true),
                (NotificationKind::IncidentResolved, false),
                (NotificationKind::IncidentOpened, true),
            ]
        );
        assert_eq!(monitor.open_incidents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_check_all_summary_and_isolation() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.script("a", &[Some(200)]);
        probe.script("b", &[Some(404)]);
        probe.script("c", &[Some(503)]);
        probe.script("d", &[None]);
        let (monitor, _rx) = setup(
            vec![agent("a"), agent("b"), agent("c"), agent("d")],
            probe,
        );

        let summary = monitor.check_all().await;
        assert_eq!(summary.total, 4);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.degraded, 1);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.down(), 2);

        assert_eq!(monitor.status_of("a"), Some(HealthStatus::Healthy));
        assert_eq!(monitor.status_of("d"), Some(HealthStatus::Unreachable));
    }

    #[tokio::test]
    async fn test_check_due_respects_poll_interval() {
        let probe = Arc::new(ScriptedProbe::default());
        let (monitor, _rx) = setup(vec![agent("a").with_poll_interval(3600)], probe);

        assert_eq!(monitor.check_due().await.total, 1);
        assert_eq!(monitor.check_due().await.total, 0);
        assert_eq!(monitor.check_all().await.total, 1);
    }

    #[tokio::test]
    async fn test_cancelled_check_reports_unreachable_without_incident() {
        let probe = Arc::new(ScriptedProbe {
            hang: true,
            ..Default::default()
        });
        let registry = Arc::new(
            AgentRegistry::from_descriptors(vec![agent("slow").with_max_consecutive_failures(1)])
                .unwrap(),
        );
        let (sink, _rx) = ChannelSink::new();
        let bridge = Arc::new(IncidentBridge::new(Arc::new(sink), BridgeConfig::default()));
        let token = CancellationToken::new();
        let monitor = Arc::new(
            HealthMonitor::new(registry, probe, bridge, MonitorConfig::default())
                .with_shutdown(token.clone()),
        );

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let summary = monitor.check_all().await;
        assert_eq!(summary.unreachable, 1);
        assert!(monitor.open_incidents().await.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_blocked_by_open_incident() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.script("agent-x", &[Some(500), Some(200)]);
        let (monitor, _rx) = setup(
            vec![agent("agent-x").with_max_consecutive_failures(1)],
            probe,
        );

        monitor.check_one("agent-x").await.unwrap();
        let err = monitor.deregister("agent-x").await.unwrap_err();
        assert_eq!(err.code(), "agent_in_use");

        monitor.check_one("agent-x").await.unwrap();
        let removed = monitor.deregister("agent-x").await.unwrap();
        assert_eq!(removed.name, "agent-x");
        assert!(!monitor.registry().contains("agent-x"));
        assert_eq!(monitor.status_of("agent-x"), None);

        let err = monitor.deregister("agent-x").await.unwrap_err();
        assert_eq!(err.code(), "unknown_agent");
    }

    #[tokio::test]
    async fn test_late_result_after_deregister_is_dropped() {
        let probe = Arc::new(ScriptedProbe::default());
        let (monitor, mut rx) = setup(
            vec![agent("agent-x").with_max_consecutive_failures(1).critical()],
            probe,
        );

        // Descriptor captured by a check still in flight
        let in_flight = monitor.registry().get("agent-x").unwrap();
        monitor.deregister("agent-x").await.unwrap();

        let late = HealthCheckResult::unreachable("agent-x", "connection refused");
        assert!(monitor.record(&in_flight, late).await.is_none());

        assert!(!monitor.states.contains_key("agent-x"));
        assert_eq!(monitor.status_of("agent-x"), None);
        assert!(monitor.open_incidents().await.is_empty());
        assert!(rx.try_recv().is_err());

        let err = monitor.deregister("agent-x").await.unwrap_err();
        assert_eq!(err.code(), "unknown_agent");
    }

    #[tokio::test]
    async fn test_get_status_and_invoke() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.script("b", &[Some(503)]);
        let (monitor, _rx) = setup(vec![agent("a"), agent("b")], probe);

        monitor.check_all().await;
        let report = monitor.get_status().await;
        assert_eq!(report.agents.len(), 2);
        assert_eq!(report.agents[1].status, Some(HealthStatus::Unhealthy));
        assert_eq!(report.agents[1].window.checks, 1);

        let value = monitor
            .invoke(&HealthInvocation {
                action: HealthAction::CheckAll,
                agent_name: None,
            })
            .await
            .unwrap();
        assert_eq!(value["total"], 2);

        let err = monitor
            .invoke(&HealthInvocation {
                action: HealthAction::CheckOne,
                agent_name: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");

        let err = monitor.check_one("ghost").await.unwrap_err();
        assert_eq!(err.code(), "unknown_agent");
    }
}
