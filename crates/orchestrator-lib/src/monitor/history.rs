//! Rolling window of poll results per agent

use crate::models::{HealthCheckResult, HealthStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Results older than this are dropped
pub const RETENTION_HOURS: i64 = 24;

/// Aggregated view of one agent over the retention window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub checks: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unreachable: usize,
    /// Share of checks that were healthy or degraded, 0-100
    pub uptime_pct: f64,
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ResultHistory {
    results: VecDeque<HealthCheckResult>,
    retention: Duration,
}

impl Default for ResultHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultHistory {
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(RETENTION_HOURS))
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            results: VecDeque::new(),
            retention,
        }
    }

    pub fn push(&mut self, result: HealthCheckResult) {
        let now = result.checked_at;
        self.results.push_back(result);
        self.prune(now);
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        while self
            .results
            .front()
            .is_some_and(|r| r.checked_at < cutoff)
        {
            self.results.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&HealthCheckResult> {
        self.results.back()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn stats(&self) -> WindowStats {
        let mut stats = WindowStats {
            checks: self.results.len(),
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unreachable: 0,
            uptime_pct: 0.0,
            avg_response_time_ms: 0.0,
            p95_response_time_ms: 0,
        };
        if self.results.is_empty() {
            return stats;
        }

        let mut times: Vec<u64> = Vec::with_capacity(self.results.len());
        for r in &self.results {
            match r.status {
                HealthStatus::Healthy => stats.healthy += 1,
                HealthStatus::Degraded => stats.degraded += 1,
                HealthStatus::Unhealthy => stats.unhealthy += 1,
                HealthStatus::Unreachable => stats.unreachable += 1,
            }
            times.push(r.response_time_ms);
        }

        let n = self.results.len() as f64;
        stats.uptime_pct = (stats.healthy + stats.degraded) as f64 / n * 100.0;
        stats.avg_response_time_ms = times.iter().sum::<u64>() as f64 / n;
        times.sort_unstable();
        // nearest-rank
        let rank = ((0.95 * n).ceil() as usize).clamp(1, times.len());
        stats.p95_response_time_ms = times[rank - 1];
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: HealthStatus, ms: u64, at: DateTime<Utc>) -> HealthCheckResult {
        HealthCheckResult::new("agent", status, ms, None).at(at)
    }

    #[test]
    fn test_window_prunes_old_results() {
        let now = Utc::now();
        let mut history = ResultHistory::new();
        history.push(result(HealthStatus::Healthy, 5, now - Duration::hours(25)));
        history.push(result(HealthStatus::Healthy, 5, now - Duration::hours(1)));
        history.push(result(HealthStatus::Unhealthy, 5, now));

        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_stats() {
        let now = Utc::now();
        let mut history = ResultHistory::new();
        for (i, status) in [
            HealthStatus::Healthy,
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            HealthStatus::Unreachable,
        ]
        .into_iter()
        .enumerate()
        {
            history.push(result(status, (i as u64 + 1) * 10, now));
        }

        let stats = history.stats();
        assert_eq!(stats.checks, 4);
        assert_eq!(stats.healthy, 2);
        assert_eq!(stats.unreachable, 1);
        assert!((stats.uptime_pct - 75.0).abs() < 1e-9);
        assert!((stats.avg_response_time_ms - 25.0).abs() < 1e-9);
        assert_eq!(stats.p95_response_time_ms, 40);
    }

    #[test]
    fn test_empty_stats() {
        let stats = ResultHistory::new().stats();
        assert_eq!(stats.checks, 0);
        assert_eq!(stats.uptime_pct, 0.0);
    }
}
