//! Agent registry and incident commands

use anyhow::Result;
use orchestrator_lib::models::{AgentDescriptor, Incident};
use tabled::Tabled;

use super::short_id;
use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, label, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct AgentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Critical")]
    critical: String,
    #[tabled(rename = "Poll")]
    poll: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Type")]
    incident_type: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Opened")]
    opened_at: String,
    #[tabled(rename = "Resolved")]
    resolved_at: String,
}

impl From<&Incident> for IncidentRow {
    fn from(i: &Incident) -> Self {
        Self {
            id: short_id(&i.id),
            agent: i.agent_name.clone(),
            incident_type: label(&i.incident_type),
            severity: color_status(&label(&i.severity)),
            failures: i.failure_count,
            opened_at: format_timestamp(&i.opened_at),
            resolved_at: i
                .resolved_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// List registered agents with their latest status
pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let agents = client.agents().await?;

    match format {
        OutputFormat::Json => print_json(&agents)?,
        OutputFormat::Table => {
            if agents.is_empty() {
                print_warning("No agents registered");
                return Ok(());
            }
            let rows = agents
                .iter()
                .map(|a| AgentRow {
                    name: a.descriptor.name.clone(),
                    category: a.descriptor.category.to_string(),
                    endpoint: a.descriptor.endpoint.clone(),
                    critical: if a.descriptor.is_critical {
                        "✓".to_string()
                    } else {
                        String::new()
                    },
                    poll: format!("{}s", a.descriptor.poll_interval_secs),
                    status: color_status(
                        &a.status
                            .map(|s| label(&s))
                            .unwrap_or_else(|| "unknown".to_string()),
                    ),
                })
                .collect();
            print_table::<AgentRow>(rows);
        }
    }
    Ok(())
}

/// Deregister an agent
pub async fn remove(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let removed: AgentDescriptor = client.delete(&format!("agents/{}", name)).await?;

    match format {
        OutputFormat::Json => print_json(&removed)?,
        OutputFormat::Table => print_success(&format!("Agent {} deregistered", removed.name)),
    }
    Ok(())
}

/// Open and recently resolved incidents
pub async fn incidents(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let view = client.incidents(limit).await?;

    if format == OutputFormat::Json {
        return print_json(&view);
    }

    if view.open.is_empty() {
        print_success("No open incidents");
    } else {
        println!("Open:");
        print_table(view.open.iter().map(IncidentRow::from).collect());
    }

    if !view.recently_resolved.is_empty() {
        println!("\nRecently resolved:");
        print_table(
            view.recently_resolved
                .iter()
                .map(IncidentRow::from)
                .collect(),
        );
    }
    Ok(())
}
