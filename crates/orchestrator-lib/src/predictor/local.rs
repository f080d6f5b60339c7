//! In-process agent exposing the capacity engine to the router

use super::{CapacityEngine, ForecastRequest, LosRequest, PatientRequirements, SurgeRequest};
use crate::error::{OrchestratorError, Result};
use crate::models::{AgentCategory, AgentDescriptor, LOCAL_SCHEME};
use crate::router::{LocalHandler, RoutingRule};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Handler name, registered as `local://capacity`
pub const CAPACITY_AGENT: &str = "capacity";

/// Actions served by [`CapacityAgent`]
pub const CAPACITY_ACTIONS: [&str; 4] = [
    "predict_los",
    "forecast_capacity",
    "check_surge",
    "recommend_placement",
];

/// Registry entry for the in-process capacity agent
pub fn capacity_descriptor() -> AgentDescriptor {
    let mut descriptor = AgentDescriptor::new(
        CAPACITY_AGENT,
        AgentCategory::System,
        format!("{}{}", LOCAL_SCHEME, CAPACITY_AGENT),
    );
    descriptor.description = Some("Predictive capacity engine".to_string());
    descriptor
}

/// Rules sending the predictive actions, and capacity vocabulary, to the
/// capacity agent
pub fn capacity_rules() -> Vec<RoutingRule> {
    let mut rule = RoutingRule::new(CAPACITY_AGENT);
    for action in CAPACITY_ACTIONS {
        rule = rule.pattern(action);
    }
    vec![rule
        .pattern("predict_*")
        .keyword("census")
        .keyword("occupancy")
        .keyword("surge")
        .keyword("bed")
        .keyword("discharge")]
}

pub struct CapacityAgent {
    engine: Arc<CapacityEngine>,
}

impl CapacityAgent {
    pub fn new(engine: Arc<CapacityEngine>) -> Self {
        Self { engine }
    }
}

fn parse<T: DeserializeOwned>(action: &str, payload: &Value) -> Result<T> {
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload.clone()
    };
    serde_json::from_value(payload)
        .map_err(|e| OrchestratorError::InvalidRequest(format!("invalid payload for {}: {}", action, e)))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| OrchestratorError::DataSource(e.into()))
}

#[async_trait]
impl LocalHandler for CapacityAgent {
    async fn handle(&self, action: &str, payload: &Value) -> Result<Value> {
        match action {
            "predict_los" => {
                let req: LosRequest = parse(action, payload)?;
                to_value(&self.engine.predict_los_with_sigma(&req.category, req.sigma).await?)
            }
            "forecast_capacity" => {
                let req: ForecastRequest = parse(action, payload)?;
                to_value(
                    &self
                        .engine
                        .forecast_capacity(&req.unit_id, req.horizon())
                        .await?,
                )
            }
            "check_surge" => {
                let req: SurgeRequest = parse(action, payload)?;
                to_value(&self.engine.check_surge(req.facility_id.as_deref()).await?)
            }
            "recommend_placement" => {
                let req: PatientRequirements = parse(action, payload)?;
                to_value(&self.engine.recommend_placement(&req).await?)
            }
            other => Err(OrchestratorError::InvalidRequest(format!(
                "capacity agent does not support action '{}'",
                other
            ))),
        }
    }
}
