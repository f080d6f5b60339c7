//! Hourly census forecasting for a unit
//!
//! Census is projected hour by hour from the current census, the historical
//! arrival rate for each hour of day, and the expected discharges of stays
//! already in progress. New arrivals leave at the population discharge rate.

use super::los::{ConfidenceInterval, POPULATION_DEFAULT};
use super::stats::std_dev;
use super::surge::SurgeLevel;
use super::{CapacityEngine, DEFAULT_FORECAST_HORIZON_HOURS};
use crate::datasource::HistoryQuery;
use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Share of an overdue stay expected to leave in the first forecast hour
const OVERDUE_DISCHARGE_WEIGHT: f64 = 0.5;

/// Fallback interval half-width as a share of capacity
const FALLBACK_SPREAD_RATIO: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    /// Offset from the forecast start, 0-based
    pub hour: u32,
    /// End of the forecast hour
    pub timestamp: DateTime<Utc>,
    pub predicted_census: f64,
    pub confidence_interval: ConfidenceInterval,
    pub risk_level: SurgeLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityForecast {
    pub unit_id: String,
    pub capacity: u32,
    pub current_census: u32,
    pub generated_at: DateTime<Utc>,
    pub points: Vec<ForecastPoint>,
    /// Admissions in the history window
    pub sample_size: usize,
    pub insufficient_history: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRequest {
    pub unit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon_hours: Option<u32>,
}

impl CapacityEngine {
    pub async fn forecast_capacity(&self, unit_id: &str, horizon_hours: u32) -> Result<CapacityForecast> {
        self.forecast_capacity_at(unit_id, horizon_hours, Utc::now())
            .await
    }

    /// Forecast as of `now`
    pub async fn forecast_capacity_at(
        &self,
        unit_id: &str,
        horizon_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<CapacityForecast> {
        let start = Instant::now();
        let max = self.config.max_forecast_horizon_hours;
        if horizon_hours == 0 || horizon_hours > max {
            return Err(OrchestratorError::InvalidRequest(format!(
                "horizon_hours must be between 1 and {}, got {}",
                max, horizon_hours
            )));
        }

        let unit = self
            .source
            .unit(unit_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownUnit(unit_id.to_string()))?;
        if unit.capacity == 0 {
            return Err(OrchestratorError::UnknownUnit(unit_id.to_string()));
        }
        let capacity = unit.capacity as f64;

        let window = Duration::days(self.config.history_window_days);
        let since = now - window;
        let admissions = self
            .source
            .admissions(&HistoryQuery::unit(unit_id).since(since))
            .await?;

        // Arrivals per hour of day, averaged over the days actually covered
        let covered_days = admissions
            .iter()
            .map(|a| a.admitted_at)
            .min()
            .map(|earliest| ((now - earliest).num_hours() as f64 / 24.0).max(1.0))
            .unwrap_or(1.0);
        let mut arrivals_by_hour = [0.0f64; 24];
        for a in admissions.iter().filter(|a| a.admitted_at <= now) {
            arrivals_by_hour[a.admitted_at.hour() as usize] += 1.0;
        }
        for rate in arrivals_by_hour.iter_mut() {
            *rate /= covered_days;
        }

        let base = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
        let horizon = horizon_hours as usize;

        // Expected discharges of stays in progress, bucketed by forecast hour
        let mut discharges = vec![0.0f64; horizon];
        for stay in admissions.iter().filter(|a| a.is_open()) {
            let expected = stay.admitted_at
                + Duration::seconds((self.expected_stay_hours(&stay.diagnosis_category) * 3600.0) as i64);
            if expected <= base {
                discharges[0] += OVERDUE_DISCHARGE_WEIGHT;
                continue;
            }
            let offset = (expected - base).num_hours() as usize;
            if offset < horizon {
                discharges[offset] += 1.0;
            }
        }

        let census_samples = self.source.census_history(unit_id, since).await?;
        let deltas: Vec<f64> = census_samples
            .windows(2)
            .filter_map(|w| {
                let hours = (w[1].timestamp - w[0].timestamp).num_minutes() as f64 / 60.0;
                (hours > 0.0).then(|| (w[1].census as f64 - w[0].census as f64) / hours)
            })
            .collect();
        let hourly_spread = if deltas.len() >= 2 {
            std_dev(&deltas)
        } else {
            (capacity * FALLBACK_SPREAD_RATIO).max(1.0)
        };
        let sigma = self.config.interval_sigma;

        let mut census = unit.occupied as f64;
        let mut new_arrivals = 0.0;
        let mut points = Vec::with_capacity(horizon);
        for h in 0..horizon {
            let hour_start = base + Duration::hours(h as i64);
            let arrivals = arrivals_by_hour[hour_start.hour() as usize];
            let arrival_discharges = new_arrivals / POPULATION_DEFAULT.mean_hours;
            new_arrivals += arrivals - arrival_discharges;

            census = (census + arrivals - discharges[h] - arrival_discharges).clamp(0.0, capacity);
            let half_width = sigma * hourly_spread * ((h + 1) as f64).sqrt();

            points.push(ForecastPoint {
                hour: h as u32,
                timestamp: hour_start + Duration::hours(1),
                predicted_census: census,
                confidence_interval: ConfidenceInterval {
                    lower: (census - half_width).max(0.0),
                    upper: (census + half_width).min(capacity),
                },
                risk_level: SurgeLevel::from_occupancy(census / capacity * 100.0),
            });
        }

        self.observe("forecast_capacity", start);

        Ok(CapacityForecast {
            unit_id: unit.unit_id,
            capacity: unit.capacity,
            current_census: unit.occupied,
            generated_at: now,
            points,
            sample_size: admissions.len(),
            insufficient_history: admissions.len() < self.config.min_learned_samples
                || deltas.len() < 2,
        })
    }
}

impl ForecastRequest {
    pub fn horizon(&self) -> u32 {
        self.horizon_hours.unwrap_or(DEFAULT_FORECAST_HORIZON_HOURS)
    }
}
