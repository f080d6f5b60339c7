//! Agent health monitoring
//!
//! Handles:
//! - Polling agents and classifying each poll
//! - Per-agent incident state machines
//! - 24h result history and window statistics
//! - The background sweep loop, including surge sampling

mod history;
mod incident;
mod probe;
mod scheduler;
mod service;

pub use history::{ResultHistory, WindowStats, RETENTION_HOURS};
pub use incident::{IncidentTracker, IncidentTransition};
pub use probe::{classify, HealthProbe, HttpProbe, ProbeOutcome, SLOW_RESPONSE_THRESHOLD};
pub use scheduler::{MonitorScheduler, SchedulerConfig, DEFAULT_TICK_INTERVAL};
pub use service::{
    AgentStatus, HealthAction, HealthInvocation, HealthMonitor, HealthSummary, MonitorConfig,
    RecoveryResult, StatusReport,
};
