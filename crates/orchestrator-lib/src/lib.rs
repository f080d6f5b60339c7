//! Agent orchestration and predictive capacity
//!
//! This crate provides the core functionality for:
//! - Routing requests to specialised agents by rule-based classification
//! - Agent health monitoring with incident tracking
//! - Predictive capacity (length of stay, census forecast, surge, placement)
//! - Incident and surge notifications
//! - Process self-health, metrics and the HTTP API

pub mod api;
pub mod datasource;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod observability;
pub mod predictor;
pub mod registry;
pub mod router;

pub use error::{OrchestratorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OrchestratorMetrics, StructuredLogger};
pub use registry::AgentRegistry;
