//! Orchestrator configuration

use anyhow::{Context, Result};
use orchestrator_lib::models::AgentDescriptor;
use orchestrator_lib::predictor::PredictorConfig;
use orchestrator_lib::router::RoutingRule;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Config file used when `ORCH_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.toml";

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Monitor sweep tick in milliseconds
    #[serde(default = "default_monitor_tick_ms")]
    pub monitor_tick_ms: u64,

    #[serde(default = "default_max_parallel_checks")]
    pub max_parallel_checks: usize,

    #[serde(default = "default_max_in_flight_routes")]
    pub max_in_flight_routes: usize,

    /// Dispatch timeout when a request carries no hint
    #[serde(default = "default_route_timeout_ms")]
    pub route_timeout_ms: u64,

    /// Routing records kept in memory
    #[serde(default = "default_route_history")]
    pub route_history: usize,

    /// Notification webhook; notifications are logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,

    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// JSON snapshot of units, beds, admissions and census samples
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// Facilities sampled for surge on every tick
    #[serde(default)]
    pub surge_facilities: Vec<String>,

    #[serde(default)]
    pub predictor: PredictorConfig,

    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,

    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "orchestrator".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_monitor_tick_ms() -> u64 {
    5_000
}

fn default_max_parallel_checks() -> usize {
    8
}

fn default_max_in_flight_routes() -> usize {
    64
}

fn default_route_timeout_ms() -> u64 {
    30_000
}

fn default_route_history() -> usize {
    1_000
}

fn default_webhook_timeout_ms() -> u64 {
    5_000
}

fn default_dedup_window_secs() -> u64 {
    15 * 60
}

impl OrchestratorConfig {
    /// Load from the optional config file, overridden by `ORCH__*` variables
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("ORCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ORCH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("surge_facilities")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        config
            .try_deserialize()
            .context("invalid orchestrator configuration")
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms.max(100))
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}
