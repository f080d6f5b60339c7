//! Length-of-stay prediction

use super::stats::{mean, std_dev};
use super::CapacityEngine;
use crate::datasource::HistoryQuery;
use crate::error::{OrchestratorError, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Reference length of stay for a diagnosis category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LosBaseline {
    pub mean_hours: f64,
    pub std_dev_hours: f64,
}

const fn baseline(mean_hours: f64, std_dev_hours: f64) -> LosBaseline {
    LosBaseline {
        mean_hours,
        std_dev_hours,
    }
}

/// Used for categories without a baseline or enough history
pub const POPULATION_DEFAULT: LosBaseline = baseline(80.0, 40.0);

const BASELINES: &[(&str, LosBaseline)] = &[
    ("cardiac", baseline(96.0, 24.0)),
    ("observation", baseline(24.0, 8.0)),
    ("sepsis", baseline(144.0, 48.0)),
    ("respiratory", baseline(120.0, 36.0)),
    ("orthopedic", baseline(72.0, 24.0)),
    ("neurology", baseline(108.0, 36.0)),
    ("surgical", baseline(84.0, 30.0)),
    ("general_medicine", baseline(72.0, 28.0)),
    ("maternity", baseline(48.0, 16.0)),
    ("pediatrics", baseline(60.0, 20.0)),
    ("psychiatric", baseline(240.0, 96.0)),
];

/// `General Medicine` and `general-medicine` both become `general_medicine`
pub fn normalize_category(category: &str) -> String {
    category
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

pub fn baseline_for(category: &str) -> Option<LosBaseline> {
    let key = normalize_category(category);
    BASELINES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, b)| *b)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    /// `center ± half_width`, floored at zero
    pub fn around(center: f64, half_width: f64) -> Self {
        Self {
            lower: (center - half_width).max(0.0),
            upper: center + half_width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LosSource {
    /// Aggregated from discharged stays of this category
    Learned,
    Baseline,
    PopulationDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LosPrediction {
    pub category: String,
    pub predicted_hours: f64,
    pub confidence_interval: ConfidenceInterval,
    /// Discharged stays of this category in the history window
    pub sample_size: usize,
    pub source: LosSource,
    pub insufficient_history: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LosRequest {
    pub category: String,
    /// Interval width in standard deviations, overrides the configured value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
}

impl CapacityEngine {
    pub async fn predict_los(&self, category: &str) -> Result<LosPrediction> {
        self.predict_los_with_sigma(category, None).await
    }

    pub async fn predict_los_with_sigma(
        &self,
        category: &str,
        sigma: Option<f64>,
    ) -> Result<LosPrediction> {
        let start = Instant::now();
        let key = normalize_category(category);
        if key.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "diagnosis category must not be empty".to_string(),
            ));
        }
        let sigma = sigma.unwrap_or(self.config.interval_sigma);
        if !(sigma.is_finite() && sigma >= 0.0) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "sigma must be a non-negative number, got {}",
                sigma
            )));
        }

        let since = Utc::now() - Duration::days(self.config.history_window_days);
        let history = self.source.admissions(&HistoryQuery::default().since(since)).await?;

        let matching: Vec<f64> = history
            .iter()
            .filter(|a| normalize_category(&a.diagnosis_category) == key)
            .filter_map(|a| a.los_hours())
            .collect();
        let sample_size = matching.len();
        let min_samples = self.config.min_learned_samples;

        let (center, spread, source) = if sample_size >= min_samples {
            (mean(&matching), std_dev(&matching), LosSource::Learned)
        } else if let Some(b) = baseline_for(&key) {
            (b.mean_hours, b.std_dev_hours, LosSource::Baseline)
        } else {
            let population: Vec<f64> = history.iter().filter_map(|a| a.los_hours()).collect();
            if population.len() >= min_samples {
                (mean(&population), std_dev(&population), LosSource::PopulationDefault)
            } else {
                (
                    POPULATION_DEFAULT.mean_hours,
                    POPULATION_DEFAULT.std_dev_hours,
                    LosSource::PopulationDefault,
                )
            }
        };

        debug!(
            category = %key,
            sample_size = sample_size,
            source = ?source,
            "Predicted length of stay"
        );
        self.observe("predict_los", start);

        Ok(LosPrediction {
            category: key,
            predicted_hours: center,
            confidence_interval: ConfidenceInterval::around(center, sigma * spread),
            sample_size,
            source,
            insufficient_history: sample_size < min_samples,
        })
    }

    /// Mean stay used when projecting discharges; never reads history
    pub(crate) fn expected_stay_hours(&self, category: &str) -> f64 {
        baseline_for(category)
            .unwrap_or(POPULATION_DEFAULT)
            .mean_hours
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{AdmissionRecord, DataSnapshot, InMemoryDataSource};
    use crate::predictor::PredictorConfig;
    use std::sync::Arc;

    fn stays(category: &str, hours: &[i64]) -> Vec<AdmissionRecord> {
        let now = Utc::now();
        hours
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let admitted = now - Duration::days(10) + Duration::hours(i as i64);
                AdmissionRecord {
                    admission_id: format!("{}-{}", category, i),
                    unit_id: "ward-4".to_string(),
                    facility_id: "north".to_string(),
                    diagnosis_category: category.to_string(),
                    admitted_at: admitted,
                    discharged_at: Some(admitted + Duration::hours(*h)),
                }
            })
            .collect()
    }

    fn engine(admissions: Vec<AdmissionRecord>) -> CapacityEngine {
        let source = InMemoryDataSource::new(DataSnapshot {
            admissions,
            ..Default::default()
        });
        CapacityEngine::new(Arc::new(source), PredictorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_baseline_used_without_history() {
        let prediction = engine(vec![]).predict_los("Cardiac").await.unwrap();

        assert_eq!(prediction.source, LosSource::Baseline);
        assert_eq!(prediction.predicted_hours, 96.0);
        assert_eq!(prediction.confidence_interval.lower, 72.0);
        assert_eq!(prediction.confidence_interval.upper, 120.0);
        assert_eq!(prediction.sample_size, 0);
        assert!(prediction.insufficient_history);
    }

    #[tokio::test]
    async fn test_learned_aggregates_replace_baseline() {
        let hours: Vec<i64> = (0..40).map(|i| if i % 2 == 0 { 50 } else { 70 }).collect();
        let prediction = engine(stays("cardiac", &hours))
            .predict_los("cardiac")
            .await
            .unwrap();

        assert_eq!(prediction.source, LosSource::Learned);
        assert!((prediction.predicted_hours - 60.0).abs() < 1e-9);
        assert_eq!(prediction.sample_size, 40);
        assert!(!prediction.insufficient_history);
    }

    #[tokio::test]
    async fn test_unknown_category_uses_population_default() {
        let prediction = engine(stays("cardiac", &[48, 72]))
            .predict_los("dermatology")
            .await
            .unwrap();

        assert_eq!(prediction.source, LosSource::PopulationDefault);
        assert_eq!(prediction.predicted_hours, POPULATION_DEFAULT.mean_hours);
        assert_eq!(prediction.sample_size, 0);
    }

    #[tokio::test]
    async fn test_sigma_widens_interval() {
        let prediction = engine(vec![])
            .predict_los_with_sigma("observation", Some(2.0))
            .await
            .unwrap();

        assert_eq!(prediction.confidence_interval.lower, 8.0);
        assert_eq!(prediction.confidence_interval.upper, 40.0);
    }

    #[tokio::test]
    async fn test_interval_lower_bound_not_negative() {
        let prediction = engine(vec![])
            .predict_los_with_sigma("psychiatric", Some(3.0))
            .await
            .unwrap();
        assert_eq!(prediction.confidence_interval.lower, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let engine = engine(vec![]);
        assert_eq!(
            engine.predict_los("  ").await.unwrap_err().code(),
            "invalid_request"
        );
        assert_eq!(
            engine
                .predict_los_with_sigma("cardiac", Some(-1.0))
                .await
                .unwrap_err()
                .code(),
            "invalid_request"
        );
    }

    #[test]
    fn test_category_normalization() {
        assert_eq!(normalize_category(" General Medicine "), "general_medicine");
        assert!(baseline_for("general-medicine").is_some());
        assert!(baseline_for("dermatology").is_none());
    }
}
