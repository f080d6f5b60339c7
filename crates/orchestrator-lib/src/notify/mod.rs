//! Incident and surge notifications
//!
//! Handles:
//! - Turning incident transitions and surge events into notifications
//! - Paging policy (non-critical agents never page)
//! - Deduplication within a configurable window
//! - Fire-and-forget delivery to a [`NotificationSink`]

mod bridge;
mod sink;

pub use bridge::{
    incident_notification, surge_notification, BridgeConfig, IncidentBridge, DEFAULT_DEDUP_WINDOW,
};
pub use sink::{ChannelSink, LogSink, NotificationSink, WebhookSink};

use crate::models::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a notification is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Agent(String),
    Facility(String),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Agent(name) => write!(f, "agent/{}", name),
            Subject::Facility(id) => write!(f, "facility/{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    IncidentOpened,
    IncidentEscalated,
    IncidentResolved,
    CapacityWarning,
    CapacityCritical,
    Diversion,
    SurgeProtocol,
    Normalized,
}

impl NotificationKind {
    /// Resolutions always go out, regardless of dedup
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            NotificationKind::IncidentResolved | NotificationKind::Normalized
        )
    }
}

/// Payload handed to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(flatten)]
    pub subject: Subject,
    pub kind: NotificationKind,
    pub severity: Severity,
    /// Whether a human should be paged
    pub page: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
