//! Read-only historical data consumed by the capacity engine
//!
//! The record store itself is external; the engine only sees the
//! [`CapacityDataSource`] trait. [`InMemoryDataSource`] serves a JSON
//! snapshot of units, beds, admissions and census samples.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

/// Current state of a care unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit_id: String,
    pub facility_id: String,
    #[serde(default)]
    pub name: String,
    /// Staffed beds
    pub capacity: u32,
    /// Current census
    pub occupied: u32,
}

impl UnitSnapshot {
    /// Occupancy as a percentage; zero capacity reads as 0%
    pub fn occupancy_pct(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.occupied as f64 / self.capacity as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedStatus {
    Available,
    Cleaning,
    PendingDischarge,
    Occupied,
    Reserved,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BedRecord {
    pub bed_id: String,
    pub unit_id: String,
    pub facility_id: String,
    pub status: BedStatus,
    /// Capabilities such as `isolation`, `telemetry`, `bariatric`
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// When the current occupant is expected to leave
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_available_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub admission_id: String,
    pub unit_id: String,
    pub facility_id: String,
    pub diagnosis_category: String,
    pub admitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discharged_at: Option<DateTime<Utc>>,
}

impl AdmissionRecord {
    pub fn is_open(&self) -> bool {
        self.discharged_at.is_none()
    }

    /// Length of stay in hours for discharged records
    pub fn los_hours(&self) -> Option<f64> {
        self.discharged_at
            .map(|d| (d - self.admitted_at).num_seconds() as f64 / 3600.0)
            .filter(|h| *h >= 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusSample {
    pub unit_id: String,
    pub timestamp: DateTime<Utc>,
    pub census: u32,
}

/// Filter for historical queries; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    pub facility_id: Option<String>,
    pub unit_id: Option<String>,
    pub diagnosis_category: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    pub fn unit(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: Some(unit_id.into()),
            ..Default::default()
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            diagnosis_category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn matches(&self, record: &AdmissionRecord) -> bool {
        self.facility_id
            .as_deref()
            .map_or(true, |f| f == record.facility_id)
            && self.unit_id.as_deref().map_or(true, |u| u == record.unit_id)
            && self
                .diagnosis_category
                .as_deref()
                .map_or(true, |c| c.eq_ignore_ascii_case(&record.diagnosis_category))
            && self.since.map_or(true, |s| record.admitted_at >= s)
            && self.until.map_or(true, |u| record.admitted_at < u)
    }
}

/// Queryable, read-only source of capacity history
#[async_trait]
pub trait CapacityDataSource: Send + Sync {
    async fn units(&self, facility_id: Option<&str>) -> Result<Vec<UnitSnapshot>>;

    async fn unit(&self, unit_id: &str) -> Result<Option<UnitSnapshot>> {
        Ok(self
            .units(None)
            .await?
            .into_iter()
            .find(|u| u.unit_id == unit_id))
    }

    async fn beds(&self, facility_id: Option<&str>) -> Result<Vec<BedRecord>>;

    async fn admissions(&self, query: &HistoryQuery) -> Result<Vec<AdmissionRecord>>;

    async fn census_history(&self, unit_id: &str, since: DateTime<Utc>) -> Result<Vec<CensusSample>>;
}

/// Serialized form of the in-memory source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    #[serde(default)]
    pub units: Vec<UnitSnapshot>,
    #[serde(default)]
    pub beds: Vec<BedRecord>,
    #[serde(default)]
    pub admissions: Vec<AdmissionRecord>,
    #[serde(default)]
    pub census: Vec<CensusSample>,
}

#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    snapshot: RwLock<DataSnapshot>,
}

impl InMemoryDataSource {
    pub fn new(snapshot: DataSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data snapshot {}", path.display()))?;
        let snapshot: DataSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse data snapshot {}", path.display()))?;
        info!(
            path = %path.display(),
            units = snapshot.units.len(),
            beds = snapshot.beds.len(),
            admissions = snapshot.admissions.len(),
            census = snapshot.census.len(),
            "Loaded data snapshot"
        );
        Ok(Self::new(snapshot))
    }

    /// Swap in a fresh snapshot
    pub async fn replace(&self, snapshot: DataSnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl CapacityDataSource for InMemoryDataSource {
    async fn units(&self, facility_id: Option<&str>) -> Result<Vec<UnitSnapshot>> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .units
            .iter()
            .filter(|u| facility_id.map_or(true, |f| f == u.facility_id))
            .cloned()
            .collect())
    }

    async fn beds(&self, facility_id: Option<&str>) -> Result<Vec<BedRecord>> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .beds
            .iter()
            .filter(|b| facility_id.map_or(true, |f| f == b.facility_id))
            .cloned()
            .collect())
    }

    async fn admissions(&self, query: &HistoryQuery) -> Result<Vec<AdmissionRecord>> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .admissions
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect())
    }

    async fn census_history(&self, unit_id: &str, since: DateTime<Utc>) -> Result<Vec<CensusSample>> {
        let snapshot = self.snapshot.read().await;
        let mut samples: Vec<CensusSample> = snapshot
            .census
            .iter()
            .filter(|c| c.unit_id == unit_id && c.timestamp >= since)
            .cloned()
            .collect();
        samples.sort_by_key(|c| c.timestamp);
        Ok(samples)
    }
}
