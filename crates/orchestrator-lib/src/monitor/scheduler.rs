//! Background sweep loop
//!
//! Each tick polls the agents that are due, samples facility occupancy for
//! surge transitions and ages out the notification dedup cache.

use super::HealthMonitor;
use crate::health::{components, monitor_status_for_sweep, HealthRegistry};
use crate::notify::IncidentBridge;
use crate::observability::{OrchestratorMetrics, StructuredLogger};
use crate::predictor::{CapacityEngine, SurgeEvent, SurgeTracker, ALL_FACILITIES};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default sweep tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Facilities sampled for surge; empty means all units together
    pub surge_facilities: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            surge_facilities: Vec::new(),
        }
    }
}

pub struct MonitorScheduler {
    monitor: Arc<HealthMonitor>,
    engine: Option<Arc<CapacityEngine>>,
    surge: Arc<SurgeTracker>,
    bridge: Arc<IncidentBridge>,
    health: HealthRegistry,
    config: SchedulerConfig,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
}

impl MonitorScheduler {
    pub fn new(
        monitor: Arc<HealthMonitor>,
        bridge: Arc<IncidentBridge>,
        health: HealthRegistry,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            monitor,
            engine: None,
            surge: Arc::new(SurgeTracker::new()),
            bridge,
            health,
            config,
            metrics: OrchestratorMetrics::new(),
            logger: StructuredLogger::new("scheduler"),
        }
    }

    /// Enable surge sampling against `engine`
    pub fn with_surge(mut self, engine: Arc<CapacityEngine>, tracker: Arc<SurgeTracker>) -> Self {
        self.engine = Some(engine);
        self.surge = tracker;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            surge = self.engine.is_some(),
            "Starting monitor scheduler"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down monitor scheduler");
                    break;
                }
            }
        }
    }

    /// One sweep; returns the surge events it produced
    pub async fn tick(&self) -> Vec<SurgeEvent> {
        let summary = self.monitor.check_due().await;
        if summary.total > 0 {
            self.health
                .update(
                    components::MONITOR,
                    monitor_status_for_sweep(summary.down(), summary.total),
                )
                .await;
        }

        let events = self.sweep_surge().await;
        self.bridge.cleanup_dedup_cache();
        events
    }

    async fn sweep_surge(&self) -> Vec<SurgeEvent> {
        let Some(engine) = &self.engine else {
            return Vec::new();
        };

        let targets: Vec<Option<&str>> = if self.config.surge_facilities.is_empty() {
            vec![None]
        } else {
            self.config
                .surge_facilities
                .iter()
                .map(|f| Some(f.as_str()))
                .collect()
        };

        let mut events = Vec::new();
        let mut failures = 0usize;
        for facility in targets {
            let status = match engine.check_surge(facility).await {
                Ok(status) => status,
                Err(e) => {
                    failures += 1;
                    warn!(
                        facility = facility.unwrap_or(ALL_FACILITIES),
                        error = %e,
                        "Surge check failed"
                    );
                    continue;
                }
            };

            self.metrics
                .set_surge_level(status.tracker_key(), status.level.rank());
            if let Some(event) = self.surge.observe(&status) {
                self.logger.log_surge_transition(
                    &event.facility_id,
                    event.previous_level.as_str(),
                    event.level.as_str(),
                    event.occupancy_pct,
                );
                self.bridge.notify_surge(&event);
                events.push(event);
            } else {
                debug!(
                    facility = status.tracker_key(),
                    level = status.level.as_str(),
                    "Surge level unchanged"
                );
            }
        }

        if failures > 0 {
            self.health
                .set_degraded(
                    components::PREDICTOR,
                    format!("{} surge check(s) failed", failures),
                )
                .await;
        } else {
            self.health.set_healthy(components::PREDICTOR).await;
        }
        events
    }
}
