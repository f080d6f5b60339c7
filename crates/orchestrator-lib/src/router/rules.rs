//! Routing rules and the compiled routing table
//!
//! Rules are scored by a linear scan in declaration order. A rule earns
//! [`PATTERN_WEIGHT`] for every pattern that matches the operation name and
//! [`KEYWORD_WEIGHT`] for every keyword found in the serialized payload.

use crate::error::{OrchestratorError, Result};
use crate::registry::AgentRegistry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Score contributed by each matching operation pattern
pub const PATTERN_WEIGHT: f64 = 0.5;

/// Score contributed by each keyword found in the payload
pub const KEYWORD_WEIGHT: f64 = 0.1;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

const REGEX_PREFIX: &str = "re:";

/// A routing rule as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Match expressions over the operation name: `exact`, `prefix*` or `re:<regex>`
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Case-insensitive substrings searched in the payload text
    #[serde(default)]
    pub keywords: Vec<String>,
    pub target_agent: String,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

impl RoutingRule {
    pub fn new(target_agent: impl Into<String>) -> Self {
        Self {
            patterns: Vec::new(),
            keywords: Vec::new(),
            target_agent: target_agent.into(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

/// A compiled operation pattern
#[derive(Debug, Clone)]
pub enum OperationPattern {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl OperationPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(expr) = raw.strip_prefix(REGEX_PREFIX) {
            let regex = Regex::new(expr).map_err(|e| {
                OrchestratorError::Config(format!("invalid routing pattern '{}': {}", raw, e))
            })?;
            return Ok(OperationPattern::Regex(regex));
        }
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OrchestratorError::Config(
                "routing pattern must not be empty".to_string(),
            ));
        }
        match raw.strip_suffix('*') {
            Some(prefix) => Ok(OperationPattern::Prefix(prefix.to_lowercase())),
            None => Ok(OperationPattern::Exact(raw.to_lowercase())),
        }
    }

    /// `operation` must already be lowercased for exact and prefix matches
    fn matches(&self, operation: &str, lowered: &str) -> bool {
        match self {
            OperationPattern::Exact(name) => lowered == name,
            OperationPattern::Prefix(prefix) => lowered.starts_with(prefix.as_str()),
            OperationPattern::Regex(regex) => regex.is_match(operation),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    patterns: Vec<OperationPattern>,
    keywords: Vec<String>,
    target_agent: String,
    min_confidence: f64,
}

/// Score of one rule against one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleScore {
    pub rule_index: usize,
    pub target_agent: String,
    pub pattern_hits: usize,
    pub keyword_hits: usize,
    pub raw_score: f64,
    /// Raw score clamped to 0..=1
    pub confidence: f64,
    pub min_confidence: f64,
}

/// Ordered, immutable set of compiled routing rules
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    rules: Vec<CompiledRule>,
}

impl RoutingTable {
    /// Compile rules in declaration order
    pub fn compile(rules: &[RoutingRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            if rule.target_agent.trim().is_empty() {
                return Err(OrchestratorError::Config(format!(
                    "routing rule #{} has no target agent",
                    index
                )));
            }
            if !(0.0..=1.0).contains(&rule.min_confidence) {
                return Err(OrchestratorError::Config(format!(
                    "routing rule #{} has min_confidence {} outside 0..=1",
                    index, rule.min_confidence
                )));
            }
            let patterns = rule
                .patterns
                .iter()
                .map(|p| OperationPattern::parse(p))
                .collect::<Result<Vec<_>>>()?;
            let mut keywords: Vec<String> = rule
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            let mut seen = HashSet::new();
            keywords.retain(|k| seen.insert(k.clone()));

            compiled.push(CompiledRule {
                patterns,
                keywords,
                target_agent: rule.target_agent.clone(),
                min_confidence: rule.min_confidence,
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule target must name a registered agent
    pub fn validate_against(&self, registry: &AgentRegistry) -> Result<()> {
        for (index, rule) in self.rules.iter().enumerate() {
            if !registry.contains(&rule.target_agent) {
                return Err(OrchestratorError::Config(format!(
                    "routing rule #{} targets unknown agent '{}'",
                    index, rule.target_agent
                )));
            }
        }
        Ok(())
    }

    /// Score every rule, in declaration order
    pub fn score_all(&self, operation: &str, payload_text: &str) -> Vec<RuleScore> {
        let lowered_op = operation.to_lowercase();
        let lowered_payload = payload_text.to_lowercase();

        self.rules
            .iter()
            .enumerate()
            .map(|(rule_index, rule)| {
                let pattern_hits = rule
                    .patterns
                    .iter()
                    .filter(|p| p.matches(operation, &lowered_op))
                    .count();
                let keyword_hits = rule
                    .keywords
                    .iter()
                    .filter(|k| lowered_payload.contains(k.as_str()))
                    .count();
                let raw_score =
                    pattern_hits as f64 * PATTERN_WEIGHT + keyword_hits as f64 * KEYWORD_WEIGHT;

                RuleScore {
                    rule_index,
                    target_agent: rule.target_agent.clone(),
                    pattern_hits,
                    keyword_hits,
                    raw_score,
                    confidence: raw_score.min(1.0),
                    min_confidence: rule.min_confidence,
                }
            })
            .collect()
    }

    pub fn ranked(&self, operation: &str, payload_text: &str) -> Vec<RuleScore> {
        rank(&self.score_all(operation, payload_text))
    }
}

/// Matching rules (raw score above zero), best first, ties by declaration order
pub fn rank(scores: &[RuleScore]) -> Vec<RuleScore> {
    let mut ranked: Vec<RuleScore> = scores
        .iter()
        .filter(|s| s.raw_score > 0.0)
        .cloned()
        .collect();
    // stable sort keeps declaration order among equal scores
    ranked.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score));
    ranked
}
