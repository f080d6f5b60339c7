//! Agent registry
//!
//! Explicitly owned catalog of the services the router dispatches to and the
//! monitor polls. Shared by `Arc` between components; there is no global
//! instance.

use crate::error::{OrchestratorError, Result};
use crate::models::AgentDescriptor;
use dashmap::DashMap;
use tracing::{debug, info};

/// Catalog of registered agents keyed by name
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<String, AgentDescriptor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Build a registry from configured descriptors, rejecting duplicates
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = AgentDescriptor>) -> Result<Self> {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor).map_err(|e| match e {
                OrchestratorError::InvalidRequest(msg) => OrchestratorError::Config(msg),
                other => other,
            })?;
        }
        Ok(registry)
    }

    /// Register a new agent
    pub fn register(&self, descriptor: AgentDescriptor) -> Result<()> {
        validate(&descriptor)?;

        match self.agents.entry(descriptor.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(OrchestratorError::InvalidRequest(
                format!("agent '{}' is already registered", descriptor.name),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(
                    agent = %descriptor.name,
                    category = %descriptor.category,
                    critical = descriptor.is_critical,
                    "Registering agent"
                );
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    /// Replace an existing descriptor (admin action), returning the previous one
    pub fn update(&self, descriptor: AgentDescriptor) -> Result<AgentDescriptor> {
        validate(&descriptor)?;

        let mut entry = self
            .agents
            .get_mut(&descriptor.name)
            .ok_or_else(|| OrchestratorError::UnknownAgent(descriptor.name.clone()))?;
        debug!(agent = %descriptor.name, "Updating agent descriptor");
        Ok(std::mem::replace(entry.value_mut(), descriptor))
    }

    /// Remove an agent. Open-incident checks live in
    /// `HealthMonitor::deregister`, which is the public path for this.
    pub(crate) fn remove(&self, name: &str) -> Option<AgentDescriptor> {
        debug!(agent = %name, "Removing agent");
        self.agents.remove(name).map(|(_, v)| v)
    }

    pub fn get(&self, name: &str) -> Option<AgentDescriptor> {
        self.agents.get(name).map(|r| r.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// All agents, ordered by name
    pub fn list(&self) -> Vec<AgentDescriptor> {
        let mut agents: Vec<_> = self.agents.iter().map(|r| r.value().clone()).collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

fn validate(descriptor: &AgentDescriptor) -> Result<()> {
    if descriptor.name.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(
            "agent name must not be empty".to_string(),
        ));
    }
    if descriptor.is_local() {
        return Ok(());
    }
    url::Url::parse(&descriptor.endpoint).map_err(|e| {
        OrchestratorError::InvalidRequest(format!(
            "agent '{}' has an invalid endpoint '{}': {}",
            descriptor.name, descriptor.endpoint, e
        ))
    })?;
    Ok(())
}
