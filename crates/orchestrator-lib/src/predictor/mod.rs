//! Predictive capacity engine
//!
//! Stateless computations over the shared historical data source:
//! length-of-stay prediction, occupancy forecasting, surge detection and
//! bed placement scoring. Every function is a pure read and may run
//! concurrently without limit.

mod forecast;
mod local;
mod los;
mod placement;
mod stats;
mod surge;

pub use forecast::{CapacityForecast, ForecastPoint, ForecastRequest};
pub use local::{capacity_descriptor, capacity_rules, CapacityAgent, CAPACITY_ACTIONS, CAPACITY_AGENT};
pub use los::{
    baseline_for, normalize_category, ConfidenceInterval, LosBaseline, LosPrediction, LosRequest,
    LosSource, POPULATION_DEFAULT,
};
pub use placement::{
    PatientRequirements, PlacementFactors, PlacementRecommendation, PlacementWeights, Requirement,
};
pub use surge::{
    SurgeEvent, SurgeEventType, SurgeLevel, SurgeRequest, SurgeStatus, SurgeTracker,
    ALL_FACILITIES, CRITICAL_THRESHOLD_PCT, DIVERSION_THRESHOLD_PCT, WARNING_THRESHOLD_PCT,
};

use crate::datasource::CapacityDataSource;
use crate::error::{OrchestratorError, Result};
use crate::observability::OrchestratorMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Discharged stays required before learned aggregates replace baselines
pub const MIN_LEARNED_SAMPLES: usize = 30;

pub const DEFAULT_FORECAST_HORIZON_HOURS: u32 = 24;

pub const MAX_FORECAST_HORIZON_HOURS: u32 = 168;

/// Configuration for the capacity engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Width of confidence intervals in standard deviations
    pub interval_sigma: f64,
    pub min_learned_samples: usize,
    /// How far back history is read
    pub history_window_days: i64,
    pub max_forecast_horizon_hours: u32,
    pub placement_weights: PlacementWeights,
    /// Recommendations returned when the request sets no limit
    pub default_placement_limit: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            interval_sigma: 1.0,
            min_learned_samples: MIN_LEARNED_SAMPLES,
            history_window_days: 90,
            max_forecast_horizon_hours: MAX_FORECAST_HORIZON_HOURS,
            placement_weights: PlacementWeights::default(),
            default_placement_limit: 10,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.interval_sigma.is_finite() && self.interval_sigma >= 0.0) {
            return Err(OrchestratorError::Config(format!(
                "interval_sigma must be a non-negative number, got {}",
                self.interval_sigma
            )));
        }
        if self.history_window_days <= 0 {
            return Err(OrchestratorError::Config(
                "history_window_days must be positive".to_string(),
            ));
        }
        if self.max_forecast_horizon_hours == 0 {
            return Err(OrchestratorError::Config(
                "max_forecast_horizon_hours must be positive".to_string(),
            ));
        }
        self.placement_weights.validate()
    }
}

/// Entry point for the four predictive functions
pub struct CapacityEngine {
    source: Arc<dyn CapacityDataSource>,
    config: PredictorConfig,
    metrics: OrchestratorMetrics,
}

impl CapacityEngine {
    pub fn new(source: Arc<dyn CapacityDataSource>, config: PredictorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            metrics: OrchestratorMetrics::new(),
        })
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    fn observe(&self, function: &str, start: Instant) {
        self.metrics
            .observe_prediction(function, start.elapsed().as_secs_f64());
    }
}
