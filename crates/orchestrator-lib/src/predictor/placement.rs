//! Bed placement scoring
//!
//! Each candidate bed is scored as a weighted sum of four factors in 0..=1:
//! availability, requirements match, unit load balance and predicted
//! turnover. Beds missing a hard requirement are never returned.

use super::CapacityEngine;
use crate::datasource::{BedRecord, BedStatus, UnitSnapshot};
use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

/// Assumed hours until a cleaning bed is ready, without an explicit estimate
const DEFAULT_CLEANING_HOURS: f64 = 1.0;

/// Assumed hours until a pending discharge frees the bed
const DEFAULT_PENDING_DISCHARGE_HOURS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementWeights {
    pub availability: f64,
    pub requirements: f64,
    pub load_balance: f64,
    pub turnover: f64,
}

impl Default for PlacementWeights {
    fn default() -> Self {
        Self {
            availability: 0.3,
            requirements: 0.3,
            load_balance: 0.25,
            turnover: 0.15,
        }
    }
}

impl PlacementWeights {
    pub fn total(&self) -> f64 {
        self.availability + self.requirements + self.load_balance + self.turnover
    }

    pub fn validate(&self) -> Result<()> {
        let all = [self.availability, self.requirements, self.load_balance, self.turnover];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) || self.total() <= 0.0 {
            return Err(OrchestratorError::Config(format!(
                "placement weights must be non-negative with a positive sum, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// A bed capability the patient needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub capability: String,
    /// Unmet hard requirements exclude the bed
    #[serde(default)]
    pub hard: bool,
}

impl Requirement {
    pub fn hard(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            hard: true,
        }
    }

    pub fn soft(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            hard: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementFactors {
    pub availability: f64,
    pub requirements_match: f64,
    pub load_balance: f64,
    pub turnover: f64,
}

impl PlacementFactors {
    fn weighted(&self, w: &PlacementWeights) -> f64 {
        (self.availability * w.availability
            + self.requirements_match * w.requirements
            + self.load_balance * w.load_balance
            + self.turnover * w.turnover)
            / w.total()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRecommendation {
    pub bed_id: String,
    pub unit_id: String,
    pub score: f64,
    pub factors: PlacementFactors,
    pub unit_occupancy_pct: f64,
}

fn availability_factor(status: BedStatus) -> Option<f64> {
    match status {
        BedStatus::Available => Some(1.0),
        BedStatus::Cleaning => Some(0.5),
        BedStatus::PendingDischarge => Some(0.25),
        BedStatus::Occupied | BedStatus::Reserved | BedStatus::Blocked => None,
    }
}

/// Share of requirements met; `None` when a hard requirement is missing
fn requirements_factor(bed: &BedRecord, requirements: &[Requirement]) -> Option<f64> {
    if requirements.is_empty() {
        return Some(1.0);
    }
    let mut met = 0usize;
    for req in requirements {
        if bed.capabilities.contains(&req.capability) {
            met += 1;
        } else if req.hard {
            return None;
        }
    }
    Some(met as f64 / requirements.len() as f64)
}

/// 1.0 for an empty unit, 0.5 at the facility average, 0 at twice the average
fn load_balance_factor(unit_occupancy: f64, average_occupancy: f64) -> f64 {
    if average_occupancy <= 0.0 {
        return 1.0;
    }
    (1.0 - (unit_occupancy / average_occupancy) / 2.0).clamp(0.0, 1.0)
}

fn turnover_factor(bed: &BedRecord, now: DateTime<Utc>) -> f64 {
    let remaining_hours = match (bed.status, bed.expected_available_at) {
        (BedStatus::Available, _) => 0.0,
        (_, Some(at)) => ((at - now).num_minutes() as f64 / 60.0).max(0.0),
        (BedStatus::Cleaning, None) => DEFAULT_CLEANING_HOURS,
        (_, None) => DEFAULT_PENDING_DISCHARGE_HOURS,
    };
    1.0 / (1.0 + remaining_hours / 24.0)
}

fn occupancy_ratio(unit: Option<&UnitSnapshot>) -> f64 {
    match unit {
        Some(u) if u.capacity > 0 => u.occupied as f64 / u.capacity as f64,
        _ => 0.0,
    }
}

impl CapacityEngine {
    pub async fn recommend_placement(
        &self,
        patient: &PatientRequirements,
    ) -> Result<Vec<PlacementRecommendation>> {
        self.recommend_placement_at(patient, Utc::now()).await
    }

    pub async fn recommend_placement_at(
        &self,
        patient: &PatientRequirements,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlacementRecommendation>> {
        let start = Instant::now();
        if patient
            .requirements
            .iter()
            .any(|r| r.capability.trim().is_empty())
        {
            return Err(OrchestratorError::InvalidRequest(
                "requirement capability must not be empty".to_string(),
            ));
        }

        let facility = patient.facility_id.as_deref();
        let units = self.source.units(facility).await?;
        let beds = self.source.beds(facility).await?;

        let units_by_id: HashMap<&str, &UnitSnapshot> =
            units.iter().map(|u| (u.unit_id.as_str(), u)).collect();
        let ratios: Vec<f64> = units
            .iter()
            .filter(|u| u.capacity > 0)
            .map(|u| occupancy_ratio(Some(u)))
            .collect();
        let average = if ratios.is_empty() {
            0.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        };
        let weights = &self.config.placement_weights;

        let mut recommendations: Vec<PlacementRecommendation> = beds
            .iter()
            .filter_map(|bed| {
                let availability = availability_factor(bed.status)?;
                let requirements_match = requirements_factor(bed, &patient.requirements)?;
                let unit_ratio = occupancy_ratio(units_by_id.get(bed.unit_id.as_str()).copied());
                let factors = PlacementFactors {
                    availability,
                    requirements_match,
                    load_balance: load_balance_factor(unit_ratio, average),
                    turnover: turnover_factor(bed, now),
                };
                Some(PlacementRecommendation {
                    bed_id: bed.bed_id.clone(),
                    unit_id: bed.unit_id.clone(),
                    score: factors.weighted(weights),
                    factors,
                    unit_occupancy_pct: unit_ratio * 100.0,
                })
            })
            .collect();

        recommendations.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| {
                    a.unit_occupancy_pct
                        .partial_cmp(&b.unit_occupancy_pct)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.bed_id.cmp(&b.bed_id))
        });
        recommendations.truncate(patient.limit.unwrap_or(self.config.default_placement_limit));

        self.observe("recommend_placement", start);
        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{DataSnapshot, InMemoryDataSource};
    use crate::predictor::PredictorConfig;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn bed(id: &str, unit: &str, status: BedStatus, caps: &[&str]) -> BedRecord {
        BedRecord {
            bed_id: id.to_string(),
            unit_id: unit.to_string(),
            facility_id: "north".to_string(),
            status,
            capabilities: caps.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
            expected_available_at: None,
        }
    }

    fn unit(id: &str, capacity: u32, occupied: u32) -> UnitSnapshot {
        UnitSnapshot {
            unit_id: id.to_string(),
            facility_id: "north".to_string(),
            name: String::new(),
            capacity,
            occupied,
        }
    }

    fn engine(units: Vec<UnitSnapshot>, beds: Vec<BedRecord>) -> CapacityEngine {
        let source = InMemoryDataSource::new(DataSnapshot {
            units,
            beds,
            ..Default::default()
        });
        CapacityEngine::new(Arc::new(source), PredictorConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_hard_requirement_excludes_beds() {
        let engine = engine(
            vec![unit("icu", 10, 5)],
            vec![
                bed("icu-1", "icu", BedStatus::Available, &["isolation", "telemetry"]),
                bed("icu-2", "icu", BedStatus::Available, &["telemetry"]),
                bed("icu-3", "icu", BedStatus::Cleaning, &["isolation"]),
            ],
        );
        let patient = PatientRequirements {
            requirements: vec![Requirement::hard("isolation"), Requirement::soft("telemetry")],
            ..Default::default()
        };

        let recs = engine.recommend_placement(&patient).await.unwrap();
        let ids: Vec<_> = recs.iter().map(|r| r.bed_id.as_str()).collect();
        assert_eq!(ids, vec!["icu-1", "icu-3"]);
        assert_eq!(recs[0].factors.requirements_match, 1.0);
        assert_eq!(recs[1].factors.requirements_match, 0.5);
    }

    #[tokio::test]
    async fn test_unavailable_beds_are_skipped() {
        let engine = engine(
            vec![unit("ward", 10, 5)],
            vec![
                bed("w-1", "ward", BedStatus::Occupied, &[]),
                bed("w-2", "ward", BedStatus::Reserved, &[]),
                bed("w-3", "ward", BedStatus::Blocked, &[]),
                bed("w-4", "ward", BedStatus::PendingDischarge, &[]),
            ],
        );

        let recs = engine
            .recommend_placement(&PatientRequirements::default())
            .await
            .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].factors.availability, 0.25);
        assert!((recs[0].factors.turnover - 1.0 / (1.0 + 4.0 / 24.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ties_broken_by_occupancy_then_bed_id() {
        // identical beds; units at the same occupancy except "quiet"
        let engine = engine(
            vec![unit("busy", 10, 8), unit("busy-2", 10, 8), unit("quiet", 10, 2)],
            vec![
                bed("b-2", "busy", BedStatus::Available, &[]),
                bed("b-1", "busy-2", BedStatus::Available, &[]),
                bed("q-1", "quiet", BedStatus::Available, &[]),
            ],
        );
        let weights_without_balance = PredictorConfig {
            placement_weights: PlacementWeights {
                load_balance: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let source = engine.source.clone();
        let engine = CapacityEngine::new(source, weights_without_balance).unwrap();

        let recs = engine
            .recommend_placement(&PatientRequirements::default())
            .await
            .unwrap();
        let ids: Vec<_> = recs.iter().map(|r| r.bed_id.as_str()).collect();
        assert_eq!(ids, vec!["q-1", "b-1", "b-2"]);

        let again = engine
            .recommend_placement(&PatientRequirements::default())
            .await
            .unwrap();
        assert_eq!(recs, again);
    }

    #[tokio::test]
    async fn test_load_balance_prefers_emptier_units() {
        let engine = engine(
            vec![unit("busy", 10, 9), unit("quiet", 10, 1)],
            vec![
                bed("a-busy", "busy", BedStatus::Available, &[]),
                bed("z-quiet", "quiet", BedStatus::Available, &[]),
            ],
        );

        let recs = engine
            .recommend_placement(&PatientRequirements::default())
            .await
            .unwrap();
        assert_eq!(recs[0].bed_id, "z-quiet");
        assert!(recs[0].factors.load_balance > recs[1].factors.load_balance);
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let beds = (0..5)
            .map(|i| bed(&format!("b-{}", i), "ward", BedStatus::Available, &[]))
            .collect();
        let engine = engine(vec![unit("ward", 10, 5)], beds);

        let recs = engine
            .recommend_placement(&PatientRequirements {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn test_weights_validation() {
        assert!(PlacementWeights::default().validate().is_ok());
        let negative = PlacementWeights {
            turnover: -0.1,
            ..Default::default()
        };
        assert!(negative.validate().is_err());
        let zero = PlacementWeights {
            availability: 0.0,
            requirements: 0.0,
            load_balance: 0.0,
            turnover: 0.0,
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_factor_helpers() {
        assert_eq!(load_balance_factor(0.5, 0.5), 0.5);
        assert_eq!(load_balance_factor(0.0, 0.5), 1.0);
        assert_eq!(load_balance_factor(1.0, 0.4), 0.0);
        assert_eq!(load_balance_factor(0.3, 0.0), 1.0);
    }
}
