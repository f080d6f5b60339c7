//! Observability infrastructure for the orchestrator
//!
//! Provides:
//! - Prometheus metrics (route latency and confidence, health check latency,
//!   agent status, incidents, surge levels, notification delivery)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

const CONFIDENCE_BUCKETS: &[f64] = &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OrchestratorMetricsInner> = OnceLock::new();

struct OrchestratorMetricsInner {
    route_latency_seconds: Histogram,
    routing_confidence: Histogram,
    routes_total: IntCounterVec,
    health_check_latency_seconds: Histogram,
    agents_by_status: IntGaugeVec,
    open_incidents: IntGauge,
    incidents_opened_total: IntCounter,
    surge_level: IntGaugeVec,
    notifications_sent_total: IntCounter,
    notification_failures_total: IntCounter,
    prediction_latency_seconds: HistogramVec,
}

impl OrchestratorMetricsInner {
    fn new() -> Self {
        Self {
            route_latency_seconds: register_histogram!(
                "orchestrator_route_latency_seconds",
                "End-to-end latency of routed requests",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register route_latency_seconds"),

            routing_confidence: register_histogram!(
                "orchestrator_routing_confidence",
                "Confidence of routing decisions that were dispatched",
                CONFIDENCE_BUCKETS.to_vec()
            )
            .expect("Failed to register routing_confidence"),

            routes_total: register_int_counter_vec!(
                "orchestrator_routes_total",
                "Routed requests by outcome",
                &["outcome"]
            )
            .expect("Failed to register routes_total"),

            health_check_latency_seconds: register_histogram!(
                "orchestrator_health_check_latency_seconds",
                "Latency of individual agent health probes",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register health_check_latency_seconds"),

            agents_by_status: register_int_gauge_vec!(
                "orchestrator_agents_by_status",
                "Number of agents per health status after the last sweep",
                &["status"]
            )
            .expect("Failed to register agents_by_status"),

            open_incidents: register_int_gauge!(
                "orchestrator_open_incidents",
                "Number of currently open incidents"
            )
            .expect("Failed to register open_incidents"),

            incidents_opened_total: register_int_counter!(
                "orchestrator_incidents_opened_total",
                "Total number of incidents opened"
            )
            .expect("Failed to register incidents_opened_total"),

            surge_level: register_int_gauge_vec!(
                "orchestrator_surge_level",
                "Surge level per facility (0 normal, 1 warning, 2 critical, 3 diversion)",
                &["facility"]
            )
            .expect("Failed to register surge_level"),

            notifications_sent_total: register_int_counter!(
                "orchestrator_notifications_sent_total",
                "Notifications handed to the sink"
            )
            .expect("Failed to register notifications_sent_total"),

            notification_failures_total: register_int_counter!(
                "orchestrator_notification_failures_total",
                "Notifications the sink failed to deliver"
            )
            .expect("Failed to register notification_failures_total"),

            prediction_latency_seconds: register_histogram_vec!(
                "orchestrator_prediction_latency_seconds",
                "Latency of predictive capacity functions",
                &["function"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),
        }
    }
}

/// Orchestrator metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct OrchestratorMetrics {
    _private: (),
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrchestratorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OrchestratorMetrics")
    }
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OrchestratorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OrchestratorMetricsInner {
        GLOBAL_METRICS.get_or_init(OrchestratorMetricsInner::new)
    }

    pub fn observe_route(&self, duration_secs: f64, confidence: f64, outcome: &str) {
        let inner = self.inner();
        inner.route_latency_seconds.observe(duration_secs);
        if confidence > 0.0 {
            inner.routing_confidence.observe(confidence);
        }
        inner.routes_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_health_check(&self, duration_secs: f64) {
        self.inner().health_check_latency_seconds.observe(duration_secs);
    }

    pub fn set_agents_by_status(&self, status: &str, count: i64) {
        self.inner()
            .agents_by_status
            .with_label_values(&[status])
            .set(count);
    }

    pub fn set_open_incidents(&self, count: i64) {
        self.inner().open_incidents.set(count);
    }

    pub fn inc_incidents_opened(&self) {
        self.inner().incidents_opened_total.inc();
    }

    pub fn set_surge_level(&self, facility: &str, level: i64) {
        self.inner().surge_level.with_label_values(&[facility]).set(level);
    }

    pub fn inc_notifications_sent(&self) {
        self.inner().notifications_sent_total.inc();
    }

    pub fn inc_notification_failures(&self) {
        self.inner().notification_failures_total.inc();
    }

    pub fn observe_prediction(&self, function: &str, duration_secs: f64) {
        self.inner()
            .prediction_latency_seconds
            .with_label_values(&[function])
            .observe(duration_secs);
    }
}

/// Structured logger for orchestrator events
///
/// One JSON event per significant domain occurrence, tagged with `event`.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_route(&self, request_id: &str, agent: &str, confidence: f64, processing_time_ms: u64) {
        info!(
            event = "route_dispatched",
            instance = %self.instance,
            request_id = %request_id,
            agent = %agent,
            confidence = confidence,
            processing_time_ms = processing_time_ms,
            "Routed request"
        );
    }

    pub fn log_route_rejected(&self, request_id: &str, action: &str, code: &str, reason: &str) {
        warn!(
            event = "route_rejected",
            instance = %self.instance,
            request_id = %request_id,
            action = %action,
            code = %code,
            reason = %reason,
            "Request was not routed"
        );
    }

    pub fn log_incident_opened(&self, agent: &str, incident_id: &str, severity: &str, message: &str) {
        warn!(
            event = "incident_opened",
            instance = %self.instance,
            agent = %agent,
            incident_id = %incident_id,
            severity = %severity,
            message = %message,
            "Incident opened"
        );
    }

    pub fn log_incident_escalated(&self, agent: &str, incident_id: &str, from: &str, to: &str) {
        warn!(
            event = "incident_escalated",
            instance = %self.instance,
            agent = %agent,
            incident_id = %incident_id,
            from_severity = %from,
            to_severity = %to,
            "Incident escalated"
        );
    }

    pub fn log_incident_resolved(&self, agent: &str, incident_id: &str, duration_secs: i64) {
        info!(
            event = "incident_resolved",
            instance = %self.instance,
            agent = %agent,
            incident_id = %incident_id,
            duration_secs = duration_secs,
            "Incident resolved"
        );
    }

    pub fn log_surge_transition(&self, facility: &str, from: &str, to: &str, occupancy_pct: f64) {
        warn!(
            event = "surge_transition",
            instance = %self.instance,
            facility = %facility,
            from_level = %from,
            to_level = %to,
            occupancy_pct = occupancy_pct,
            "Surge level changed"
        );
    }

    pub fn log_notification_failed(&self, sink: &str, subject: &str, error: &str) {
        warn!(
            event = "notification_failed",
            instance = %self.instance,
            sink = %sink,
            subject = %subject,
            error = %error,
            "Notification delivery failed"
        );
    }

    pub fn log_startup(&self, version: &str, agents: usize, rules: usize) {
        info!(
            event = "orchestrator_started",
            instance = %self.instance,
            version = %version,
            agents = agents,
            rules = rules,
            "Capacity orchestrator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "orchestrator_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Capacity orchestrator shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let metrics = OrchestratorMetrics::new();
        let clone = metrics.clone();

        metrics.observe_route(0.02, 0.8, "success");
        clone.observe_health_check(0.005);
        clone.set_agents_by_status("healthy", 3);
        metrics.set_open_incidents(1);
        metrics.inc_incidents_opened();
        metrics.set_surge_level("north", 2);
        metrics.observe_prediction("forecast_capacity", 0.001);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("orchestrator-0");
        assert_eq!(logger.instance, "orchestrator-0");
    }
}
