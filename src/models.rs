use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Failed,
}

impl HealthStatus {
    pub(crate) fn from_score(score: u8) -> Self {
        match score {
            4.. => HealthStatus::Healthy,
            2 | 3 => HealthStatus::Degraded,
            _ => HealthStatus::Failed,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the four weighted checks of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct HealthChecks {
    pub(crate) service_running: bool,
    pub(crate) network_connectivity: bool,
    pub(crate) tunnel_connectivity: bool,
    pub(crate) shell_running: bool,
}

impl HealthChecks {
    pub(crate) const TOTAL: u8 = 4;

    pub(crate) fn score(&self) -> u8 {
        [
            self.service_running,
            self.network_connectivity,
            self.tunnel_connectivity,
            self.shell_running,
        ]
        .iter()
        .filter(|passed| **passed)
        .count() as u8
    }

    pub(crate) fn failing(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.service_running {
            issues.push("tunnel service not running".to_string());
        }
        if !self.network_connectivity {
            issues.push("network connectivity".to_string());
        }
        if !self.tunnel_connectivity {
            issues.push("tunnel connectivity".to_string());
        }
        if !self.shell_running {
            issues.push("local shell service not running".to_string());
        }
        issues
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Evaluation {
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) score: u8,
    pub(crate) status: HealthStatus,
    pub(crate) issues: Vec<String>,
}

impl Evaluation {
    pub(crate) fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub(crate) fn health_percentage(&self) -> u8 {
        percentage(self.score, HealthChecks::TOTAL)
    }
}

pub(crate) fn percentage(part: u8, total: u8) -> u8 {
    if total == 0 {
        return 0;
    }
    (u32::from(part) * 100 / u32::from(total)) as u8
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TunnelState {
    pub(crate) status: HealthStatus,
    pub(crate) last_check_at: Option<DateTime<Utc>>,
    pub(crate) last_success_at: Option<DateTime<Utc>>,
    pub(crate) consecutive_failures: u32,
    pub(crate) reconnect_count: u64,
    pub(crate) health_score: u8,
    pub(crate) health_percentage: u8,
    pub(crate) hostname: Option<String>,
    pub(crate) tunnel_id: Option<String>,
    pub(crate) network_connectivity_pct: u8,
    /// Reference hosts that answered the latest sweep.
    pub(crate) reachable_hosts: usize,
    pub(crate) service_running: bool,
    pub(crate) network_ok: bool,
    pub(crate) config_valid: bool,
    pub(crate) info_accessible: bool,
    pub(crate) http_accessible: bool,
    pub(crate) shell_running: bool,
    pub(crate) config_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum StabilityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl StabilityTier {
    /// Lower bounds are inclusive.
    pub(crate) fn from_rate(rate: u8) -> Self {
        match rate {
            95.. => StabilityTier::Excellent,
            85..=94 => StabilityTier::Good,
            70..=84 => StabilityTier::Fair,
            _ => StabilityTier::Poor,
        }
    }

    pub(crate) fn is_acceptable(self) -> bool {
        self != StabilityTier::Poor
    }
}

impl fmt::Display for StabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StabilityTier::Excellent => "excellent",
            StabilityTier::Good => "good",
            StabilityTier::Fair => "fair",
            StabilityTier::Poor => "poor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StabilitySummary {
    pub(crate) duration: Duration,
    pub(crate) sample_count: u64,
    pub(crate) success_count: u64,
    pub(crate) success_rate: u8,
    pub(crate) tier: StabilityTier,
}

#[derive(Debug, Clone)]
pub(crate) struct TunnelMetrics {
    pub(crate) uptime_start: DateTime<Utc>,
    pub(crate) total_checks: u64,
    pub(crate) successful_checks: u64,
    pub(crate) degraded_checks: u64,
    pub(crate) failed_checks: u64,
    pub(crate) reconnections: u64,
    pub(crate) network_interruptions: u64,
    pub(crate) fatal_alerts: u64,
    pub(crate) last_stability: Option<StabilitySummary>,
}

impl TunnelMetrics {
    pub(crate) fn new(uptime_start: DateTime<Utc>) -> Self {
        Self {
            uptime_start,
            total_checks: 0,
            successful_checks: 0,
            degraded_checks: 0,
            failed_checks: 0,
            reconnections: 0,
            network_interruptions: 0,
            fatal_alerts: 0,
            last_stability: None,
        }
    }

    pub(crate) fn success_rate(&self) -> u8 {
        if self.total_checks == 0 {
            return 0;
        }
        (self.successful_checks * 100 / self.total_checks) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReconnectEntry {
    pub(crate) at: DateTime<Utc>,
    pub(crate) reason: String,
}

/// Append-only log of reconnection attempts, in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReconnectHistory {
    entries: Vec<ReconnectEntry>,
}

impl ReconnectHistory {
    pub(crate) fn record(&mut self, at: DateTime<Utc>, reason: impl Into<String>) {
        self.entries.push(ReconnectEntry {
            at,
            reason: reason.into(),
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// The most recent `limit` entries, oldest first.
    pub(crate) fn tail(&self, limit: usize) -> &[ReconnectEntry] {
        let start = self.entries.len().saturating_sub(limit);
        &self.entries[start..]
    }
}

/// Everything the monitor owns for the lifetime of the process.
#[derive(Debug, Clone)]
pub(crate) struct MonitorState {
    pub(crate) tunnel: TunnelState,
    pub(crate) metrics: TunnelMetrics,
    pub(crate) history: ReconnectHistory,
}

impl MonitorState {
    pub(crate) fn new() -> Self {
        Self {
            tunnel: TunnelState::default(),
            metrics: TunnelMetrics::new(Utc::now()),
            history: ReconnectHistory::default(),
        }
    }

    pub(crate) fn record_reconnect(&mut self, reason: &str) {
        self.tunnel.reconnect_count += 1;
        self.metrics.reconnections += 1;
        self.history.record(Utc::now(), reason);
    }
}

/// One persisted evaluation, stored as a JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CheckRecord {
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) score: u8,
    pub(crate) status: HealthStatus,
    pub(crate) health_percentage: u8,
    pub(crate) network_connectivity_pct: u8,
    #[serde(default)]
    pub(crate) issues: Vec<String>,
}

impl CheckRecord {
    pub(crate) fn from_evaluation(evaluation: &Evaluation, network_connectivity_pct: u8) -> Self {
        Self {
            timestamp: evaluation.timestamp,
            score: evaluation.score,
            status: evaluation.status,
            health_percentage: evaluation.health_percentage(),
            network_connectivity_pct,
            issues: evaluation.issues.clone(),
        }
    }
}
