//! Agent health commands

use anyhow::Result;
use orchestrator_lib::models::HealthCheckResult;
use orchestrator_lib::monitor::{
    HealthAction, HealthInvocation, HealthSummary, RecoveryResult, StatusReport,
};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_pct, format_timestamp, label, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Response")]
    response: String,
    #[tabled(rename = "Checked")]
    checked_at: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&HealthCheckResult> for CheckRow {
    fn from(r: &HealthCheckResult) -> Self {
        Self {
            agent: r.agent_name.clone(),
            status: color_status(&label(&r.status)),
            response: format!("{}ms", r.response_time_ms),
            checked_at: format_timestamp(&r.checked_at),
            error: r.error_message.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Critical")]
    critical: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Uptime 24h")]
    uptime: String,
    #[tabled(rename = "Avg")]
    avg: String,
    #[tabled(rename = "p95")]
    p95: String,
    #[tabled(rename = "Incident")]
    incident: String,
}

async fn invoke<T: serde::de::DeserializeOwned>(
    client: &ApiClient,
    action: HealthAction,
    agent: Option<&str>,
) -> Result<T> {
    let invocation = HealthInvocation {
        action,
        agent_name: agent.map(str::to_string),
    };
    client.post("health", &invocation).await
}

/// Poll every agent now
pub async fn check_all(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let summary: HealthSummary = invoke(client, HealthAction::CheckAll, None).await?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            if summary.total == 0 {
                print_warning("No agents registered");
                return Ok(());
            }
            print_table(summary.results.iter().map(CheckRow::from).collect());
            println!(
                "\n{} healthy, {} degraded, {} unhealthy, {} unreachable ({} total, {}ms)",
                summary.healthy,
                summary.degraded,
                summary.unhealthy,
                summary.unreachable,
                summary.total,
                summary.duration_ms
            );
        }
    }
    Ok(())
}

/// Poll one agent now
pub async fn check_one(client: &ApiClient, agent: &str, format: OutputFormat) -> Result<()> {
    let result: HealthCheckResult = invoke(client, HealthAction::CheckOne, Some(agent)).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => print_table(vec![CheckRow::from(&result)]),
    }
    Ok(())
}

/// Aggregated 24h status
pub async fn status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: StatusReport = invoke(client, HealthAction::GetStatus, None).await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    if report.agents.is_empty() {
        print_warning("No agents registered");
        return Ok(());
    }

    let rows = report
        .agents
        .iter()
        .map(|a| StatusRow {
            agent: a.name.clone(),
            category: a.category.to_string(),
            critical: if a.is_critical { "✓".to_string() } else { String::new() },
            status: color_status(
                &a.status
                    .map(|s| label(&s))
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            failures: a.consecutive_failures,
            uptime: if a.window.checks == 0 {
                "-".to_string()
            } else {
                format_pct(a.window.uptime_pct)
            },
            avg: format!("{:.0}ms", a.window.avg_response_time_ms),
            p95: format!("{}ms", a.window.p95_response_time_ms),
            incident: a
                .open_incident
                .as_ref()
                .map(|i| color_status(&label(&i.severity)))
                .unwrap_or_default(),
        })
        .collect();
    print_table::<StatusRow>(rows);

    if report.open_incidents.is_empty() {
        print_success("No open incidents");
    } else {
        print_warning(&format!("{} open incident(s)", report.open_incidents.len()));
    }
    Ok(())
}

/// Ask an agent to recover and re-probe it
pub async fn recover(client: &ApiClient, agent: &str, format: OutputFormat) -> Result<()> {
    let result: RecoveryResult = invoke(client, HealthAction::Recover, Some(agent)).await?;

    if format == OutputFormat::Json {
        return print_json(&result);
    }

    match &result.recovery_error {
        None => print_info(&format!("Recovery requested for {}", result.agent_name)),
        Some(e) => print_warning(&format!("Recovery request failed: {}", e)),
    }
    print_table(vec![CheckRow::from(&result.result)]);

    if let Some(incident) = &result.resolved_incident {
        print_success(&format!("Incident {} resolved", incident.id));
    } else if let Some(incident) = &result.open_incident {
        print_warning(&format!(
            "Incident {} still open ({})",
            incident.id,
            label(&incident.severity)
        ));
    }
    Ok(())
}
