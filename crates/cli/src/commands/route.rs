//! Routing commands

use anyhow::{Context, Result};
use orchestrator_lib::router::RouteRequest;
use serde_json::Value;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_confidence, color_status, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Rule")]
    rule: usize,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Patterns")]
    patterns: usize,
    #[tabled(rename = "Keywords")]
    keywords: usize,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Required")]
    required: String,
}

pub struct RouteArgs {
    pub action: String,
    pub payload: Option<String>,
    pub prefer: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl RouteArgs {
    fn into_request(self) -> Result<RouteRequest> {
        let payload = match &self.payload {
            Some(raw) => serde_json::from_str(raw).context("Payload must be valid JSON")?,
            None => Value::Null,
        };
        let mut request = RouteRequest::new(self.action, payload);
        if let Some(agent) = self.prefer {
            request = request.prefer(agent);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            request = request.with_timeout_ms(timeout_ms);
        }
        Ok(request)
    }
}

/// Route a request through the orchestrator
pub async fn route(client: &ApiClient, args: RouteArgs, format: OutputFormat) -> Result<()> {
    let request = args.into_request()?;
    let response = client.route(&request).await?;

    if format == OutputFormat::Json {
        print_json(&response)?;
    } else {
        let agent = response
            .metadata
            .routed_to
            .clone()
            .unwrap_or_else(|| "-".to_string());
        println!("Request:    {}", response.request_id);
        println!("Agent:      {}", agent);
        println!(
            "Confidence: {}",
            color_confidence(response.metadata.routing_confidence)
        );
        println!("Time:       {}ms", response.metadata.processing_time_ms);

        if response.success {
            print_success("Routed successfully");
            if let Some(data) = &response.data {
                println!("{}", serde_json::to_string_pretty(data)?);
            }
        } else if let Some(err) = &response.error {
            println!("Outcome:    {}", color_status("failed"));
            println!("Code:       {}", err.code);
            println!("Message:    {}", err.message);
        }
    }

    if !response.success {
        let code = response
            .error
            .map(|e| e.code)
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("Route {} failed: {}", response.request_id, code);
    }
    Ok(())
}

/// Show where a request would go without dispatching it
pub async fn classify(client: &ApiClient, args: RouteArgs, format: OutputFormat) -> Result<()> {
    let request = args.into_request()?;
    let decision = client.classify(&request).await?;

    match format {
        OutputFormat::Json => print_json(&decision)?,
        OutputFormat::Table => {
            println!(
                "Target: {} ({})",
                decision.target_agent,
                color_confidence(decision.confidence)
            );
            if decision.scores.is_empty() {
                print_warning("No rule scored above zero");
                return Ok(());
            }
            let rows = decision
                .scores
                .iter()
                .map(|s| ScoreRow {
                    rule: s.rule_index,
                    agent: s.target_agent.clone(),
                    patterns: s.pattern_hits,
                    keywords: s.keyword_hits,
                    confidence: color_confidence(s.confidence),
                    required: format!("{:.0}%", s.min_confidence * 100.0),
                })
                .collect();
            print_table::<ScoreRow>(rows);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_build_request() {
        let request = RouteArgs {
            action: "predict_los".to_string(),
            payload: Some(r#"{"category":"sepsis"}"#.to_string()),
            prefer: Some("capacity".to_string()),
            timeout_ms: Some(500),
        }
        .into_request()
        .unwrap();

        assert_eq!(request.payload["category"], "sepsis");
        assert_eq!(request.preferred_agent(), Some("capacity"));
        assert_eq!(request.timeout_ms(), Some(500));
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let err = RouteArgs {
            action: "x".to_string(),
            payload: Some("{not json".to_string()),
            prefer: None,
            timeout_ms: None,
        }
        .into_request()
        .unwrap_err();

        assert!(err.to_string().contains("valid JSON"));
    }
}
