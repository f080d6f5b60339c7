//! Surge-level detection and transition tracking

use super::CapacityEngine;
use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const WARNING_THRESHOLD_PCT: f64 = 85.0;
pub const CRITICAL_THRESHOLD_PCT: f64 = 92.0;
/// Occupancy strictly above this is diversion
pub const DIVERSION_THRESHOLD_PCT: f64 = 98.0;

/// Key used by the tracker when no facility is given
pub const ALL_FACILITIES: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurgeLevel {
    Normal,
    Warning,
    Critical,
    Diversion,
}

impl SurgeLevel {
    /// normal < 85; warning [85, 92); critical [92, 98]; diversion > 98
    pub fn from_occupancy(occupancy_pct: f64) -> Self {
        if occupancy_pct > DIVERSION_THRESHOLD_PCT {
            SurgeLevel::Diversion
        } else if occupancy_pct >= CRITICAL_THRESHOLD_PCT {
            SurgeLevel::Critical
        } else if occupancy_pct >= WARNING_THRESHOLD_PCT {
            SurgeLevel::Warning
        } else {
            SurgeLevel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SurgeLevel::Normal => "normal",
            SurgeLevel::Warning => "warning",
            SurgeLevel::Critical => "critical",
            SurgeLevel::Diversion => "diversion",
        }
    }

    /// Gauge value, 0 for normal up to 3 for diversion
    pub fn rank(&self) -> i64 {
        match self {
            SurgeLevel::Normal => 0,
            SurgeLevel::Warning => 1,
            SurgeLevel::Critical => 2,
            SurgeLevel::Diversion => 3,
        }
    }

    fn trigger(&self, occupancy_pct: f64) -> String {
        match self {
            SurgeLevel::Normal => format!(
                "occupancy {:.1}% below warning threshold {}%",
                occupancy_pct, WARNING_THRESHOLD_PCT
            ),
            SurgeLevel::Warning => format!(
                "occupancy {:.1}% at or above warning threshold {}%",
                occupancy_pct, WARNING_THRESHOLD_PCT
            ),
            SurgeLevel::Critical => format!(
                "occupancy {:.1}% at or above critical threshold {}%",
                occupancy_pct, CRITICAL_THRESHOLD_PCT
            ),
            SurgeLevel::Diversion => format!(
                "occupancy {:.1}% above diversion threshold {}%",
                occupancy_pct, DIVERSION_THRESHOLD_PCT
            ),
        }
    }
}

impl std::fmt::Display for SurgeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurgeStatus {
    pub facility_id: Option<String>,
    pub level: SurgeLevel,
    pub occupancy_pct: f64,
    pub occupied: u32,
    pub capacity: u32,
    pub units: usize,
    pub trigger: String,
    pub checked_at: DateTime<Utc>,
}

impl SurgeStatus {
    pub fn tracker_key(&self) -> &str {
        self.facility_id.as_deref().unwrap_or(ALL_FACILITIES)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurgeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurgeEventType {
    CapacityWarning,
    CapacityCritical,
    Diversion,
    /// Escalation that skipped at least one level
    SurgeProtocol,
    Normalized,
}

impl SurgeEventType {
    /// Event for a change from `from` to `to`; `None` when the level is unchanged
    pub fn for_transition(from: SurgeLevel, to: SurgeLevel) -> Option<Self> {
        if from == to {
            return None;
        }
        if to == SurgeLevel::Normal {
            return Some(SurgeEventType::Normalized);
        }
        if to.rank() - from.rank() > 1 {
            return Some(SurgeEventType::SurgeProtocol);
        }
        Some(match to {
            SurgeLevel::Warning => SurgeEventType::CapacityWarning,
            SurgeLevel::Critical => SurgeEventType::CapacityCritical,
            SurgeLevel::Diversion | SurgeLevel::Normal => SurgeEventType::Diversion,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurgeEvent {
    pub facility_id: String,
    #[serde(rename = "type")]
    pub event_type: SurgeEventType,
    pub previous_level: SurgeLevel,
    pub level: SurgeLevel,
    pub occupancy_pct: f64,
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
}

/// Last observed level per facility; a facility starts at normal
#[derive(Debug, Default)]
pub struct SurgeTracker {
    levels: DashMap<String, SurgeLevel>,
}

impl SurgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, facility: &str) -> SurgeLevel {
        self.levels
            .get(facility)
            .map(|l| *l)
            .unwrap_or(SurgeLevel::Normal)
    }

    /// Record a status; returns exactly one event per level change
    pub fn observe(&self, status: &SurgeStatus) -> Option<SurgeEvent> {
        let key = status.tracker_key().to_string();
        let previous = {
            let mut entry = self.levels.entry(key.clone()).or_insert(SurgeLevel::Normal);
            std::mem::replace(entry.value_mut(), status.level)
        };

        SurgeEventType::for_transition(previous, status.level).map(|event_type| SurgeEvent {
            facility_id: key,
            event_type,
            previous_level: previous,
            level: status.level,
            occupancy_pct: status.occupancy_pct,
            trigger: status.trigger.clone(),
            timestamp: status.checked_at,
        })
    }
}

impl CapacityEngine {
    /// Aggregate occupancy across a facility's units, or all units
    pub async fn check_surge(&self, facility_id: Option<&str>) -> Result<SurgeStatus> {
        let start = Instant::now();
        let units = self.source.units(facility_id).await?;

        let capacity: u32 = units.iter().map(|u| u.capacity).sum();
        let occupied: u32 = units.iter().map(|u| u.occupied).sum();
        if capacity == 0 {
            return Err(OrchestratorError::UnknownFacility(
                facility_id.unwrap_or(ALL_FACILITIES).to_string(),
            ));
        }

        let occupancy_pct = occupied as f64 / capacity as f64 * 100.0;
        let level = SurgeLevel::from_occupancy(occupancy_pct);
        self.observe("check_surge", start);

        Ok(SurgeStatus {
            facility_id: facility_id.map(str::to_string),
            level,
            occupancy_pct,
            occupied,
            capacity,
            units: units.len(),
            trigger: level.trigger(occupancy_pct),
            checked_at: Utc::now(),
        })
    }
}
