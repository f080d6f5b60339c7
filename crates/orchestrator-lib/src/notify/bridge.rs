//! Bridge from incident transitions and surge events to the notification sink

use super::{Notification, NotificationKind, NotificationSink, Subject};
use crate::models::{AgentDescriptor, Severity};
use crate::monitor::IncidentTransition;
use crate::observability::{OrchestratorMetrics, StructuredLogger};
use crate::predictor::{SurgeEvent, SurgeEventType};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Default deduplication window (15 minutes)
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Identical (subject, kind) notifications inside this window are dropped
    /// until a resolution for the subject goes out
    pub dedup_window: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    subject: Subject,
    kind: NotificationKind,
}

/// Applies paging policy and dedup, then hands notifications to the sink
/// without waiting for delivery
pub struct IncidentBridge {
    sink: Arc<dyn NotificationSink>,
    config: BridgeConfig,
    recent: DashMap<DedupKey, Instant>,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
}

impl IncidentBridge {
    pub fn new(sink: Arc<dyn NotificationSink>, config: BridgeConfig) -> Self {
        Self {
            sink,
            config,
            recent: DashMap::new(),
            metrics: OrchestratorMetrics::new(),
            logger: StructuredLogger::new("bridge"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Notify an incident transition; returns what was sent, `None` if suppressed
    pub fn notify_incident(
        &self,
        agent: &AgentDescriptor,
        transition: &IncidentTransition,
    ) -> Option<Notification> {
        self.dispatch(incident_notification(agent, transition))
    }

    pub fn notify_surge(&self, event: &SurgeEvent) -> Option<Notification> {
        self.dispatch(surge_notification(event))
    }

    fn dispatch(&self, notification: Notification) -> Option<Notification> {
        let key = DedupKey {
            subject: notification.subject.clone(),
            kind: notification.kind,
        };
        if notification.kind.is_resolution() {
            // The episode is closed; the next one must notify again
            self.recent.retain(|k, _| k.subject != key.subject);
        } else {
            if self.should_suppress(&key) {
                debug!(
                    subject = %notification.subject,
                    kind = ?notification.kind,
                    "Suppressing duplicate notification"
                );
                return None;
            }
            self.recent.insert(key, Instant::now());
        }
        self.emit(notification.clone());
        Some(notification)
    }

    fn should_suppress(&self, key: &DedupKey) -> bool {
        self.recent
            .get(key)
            .is_some_and(|last| last.elapsed() < self.config.dedup_window)
    }

    /// Drop dedup entries older than the window
    pub fn cleanup_dedup_cache(&self) {
        let window = self.config.dedup_window;
        self.recent.retain(|_, last| last.elapsed() < window);
    }

    pub fn dedup_cache_size(&self) -> usize {
        self.recent.len()
    }

    /// Fire and forget: delivery failures are logged and counted only
    fn emit(&self, notification: Notification) {
        let sink = self.sink.clone();
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            match sink.send(&notification).await {
                Ok(()) => metrics.inc_notifications_sent(),
                Err(e) => {
                    metrics.inc_notification_failures();
                    logger.log_notification_failed(
                        sink.name(),
                        &notification.subject.to_string(),
                        &format!("{:#}", e),
                    );
                }
            }
        });
    }
}

/// Non-critical agents are capped at medium and never page; critical agents
/// page on high and above. Resolutions are low and never page.
pub fn incident_notification(agent: &AgentDescriptor, transition: &IncidentTransition) -> Notification {
    let incident = transition.incident();
    let (kind, severity) = match transition {
        IncidentTransition::Opened(i) => (NotificationKind::IncidentOpened, i.severity),
        IncidentTransition::Escalated { incident, .. } => {
            (NotificationKind::IncidentEscalated, incident.severity)
        }
        IncidentTransition::Resolved(_) => (NotificationKind::IncidentResolved, Severity::Low),
    };
    let (severity, page) = if kind == NotificationKind::IncidentResolved {
        (Severity::Low, false)
    } else if agent.is_critical {
        (severity, severity >= Severity::High)
    } else {
        (severity.min(Severity::Medium), false)
    };

    Notification {
        id: Uuid::new_v4(),
        subject: Subject::Agent(agent.name.clone()),
        kind,
        severity,
        page,
        message: incident.message.clone(),
        timestamp: Utc::now(),
    }
}

/// Critical, diversion and protocol events page like a critical incident
pub fn surge_notification(event: &SurgeEvent) -> Notification {
    let (kind, severity, page) = match event.event_type {
        SurgeEventType::CapacityWarning => (NotificationKind::CapacityWarning, Severity::Medium, false),
        SurgeEventType::CapacityCritical => (NotificationKind::CapacityCritical, Severity::Critical, true),
        SurgeEventType::Diversion => (NotificationKind::Diversion, Severity::Critical, true),
        SurgeEventType::SurgeProtocol => (NotificationKind::SurgeProtocol, Severity::Critical, true),
        SurgeEventType::Normalized => (NotificationKind::Normalized, Severity::Low, false),
    };

    Notification {
        id: Uuid::new_v4(),
        subject: Subject::Facility(event.facility_id.clone()),
        kind,
        severity,
        page,
        message: format!(
            "Facility {} surge level {} -> {}: {}",
            event.facility_id, event.previous_level, event.level, event.trigger
        ),
        timestamp: Utc::now(),
    }
}
