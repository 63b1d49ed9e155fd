//! Domain types for the Sentinel state store.
//!
//! These types represent check results, reports, policies, repair actions
//! and the trend aggregates derived from them. All persisted types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Identifier assigned to a stored report.
pub type ReportId = u64;

/// Identifier assigned to a stored repair action.
pub type RepairId = u64;

// ── Check results ──────────────────────────────────────────────────

/// Outcome of a single check. Ordered so that `Pass < Warn < Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    /// Worst status of a set; an empty set is `Pass`.
    pub fn worst<I: IntoIterator<Item = CheckStatus>>(statuses: I) -> CheckStatus {
        statuses.into_iter().max().unwrap_or(CheckStatus::Pass)
    }

    /// Health score used in trend output (pass 100, warn 50, fail 0).
    pub fn score(self) -> u8 {
        match self {
            CheckStatus::Pass => 100,
            CheckStatus::Warn => 50,
            CheckStatus::Fail => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which probe produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Container,
    Http,
    Database,
    Route,
    Performance,
    Dependency,
    Security,
    /// Synthetic results produced by the orchestrator itself.
    Internal,
}

/// Observed failure pattern for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    BadStatus,
    NotRunning,
    DependencyDown,
    RouteBroken,
    Slow,
    CriticalVulnerability,
    HighVulnerability,
    ProbeError,
}

/// What one checker saw for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetObservation {
    pub target: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl TargetObservation {
    pub fn healthy(target: impl Into<String>, response_time_ms: Option<u64>) -> Self {
        Self {
            target: target.into(),
            status: CheckStatus::Pass,
            response_time_ms,
            failure: None,
        }
    }

    pub fn failing(target: impl Into<String>, status: CheckStatus, failure: FailureKind) -> Self {
        Self {
            target: target.into(),
            status,
            response_time_ms: None,
            failure: Some(failure),
        }
    }

    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }
}

/// Output of one checker. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub kind: CheckKind,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
    /// Checker-specific payload.
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Per-target observations (the join key for policies and repairs).
    #[serde(default)]
    pub targets: Vec<TargetObservation>,
}

impl CheckResult {
    pub fn new(
        name: impl Into<String>,
        kind: CheckKind,
        status: CheckStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            status,
            message: message.into(),
            duration: Duration::ZERO,
            details: serde_json::Map::new(),
            targets: Vec::new(),
        }
    }

    pub fn pass(name: impl Into<String>, kind: CheckKind, message: impl Into<String>) -> Self {
        Self::new(name, kind, CheckStatus::Pass, message)
    }

    pub fn warn(name: impl Into<String>, kind: CheckKind, message: impl Into<String>) -> Self {
        Self::new(name, kind, CheckStatus::Warn, message)
    }

    pub fn fail(name: impl Into<String>, kind: CheckKind, message: impl Into<String>) -> Self {
        Self::new(name, kind, CheckStatus::Fail, message)
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_target(mut self, observation: TargetObservation) -> Self {
        self.targets.push(observation);
        self
    }

    pub fn with_targets(mut self, observations: Vec<TargetObservation>) -> Self {
        self.targets.extend(observations);
        self
    }
}

// ── Reports ────────────────────────────────────────────────────────

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Scheduled,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Manual => f.pad("manual"),
            TriggerSource::Scheduled => f.pad("scheduled"),
        }
    }
}

/// Aggregate of all check results from one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Unix timestamp (milliseconds) when the cycle started.
    pub timestamp_ms: u64,
    pub overall_status: CheckStatus,
    pub results: Vec<CheckResult>,
    pub trigger: TriggerSource,
    pub cycle_duration: Duration,
}

/// Aggregate counts over a report's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
}

impl Report {
    /// Build a report; the overall status is derived from `results`.
    pub fn new(
        results: Vec<CheckResult>,
        trigger: TriggerSource,
        timestamp_ms: u64,
        cycle_duration: Duration,
    ) -> Self {
        let overall_status = CheckStatus::worst(results.iter().map(|r| r.status));
        Self {
            timestamp_ms,
            overall_status,
            results,
            trigger,
            cycle_duration,
        }
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.results.len(),
            ..Summary::default()
        };
        for result in &self.results {
            match result.status {
                CheckStatus::Pass => summary.passed += 1,
                CheckStatus::Warn => summary.warned += 1,
                CheckStatus::Fail => summary.failed += 1,
            }
        }
        summary
    }

    /// Targets with at least one non-passing observation carrying a failure.
    pub fn affected_targets(&self) -> BTreeSet<String> {
        self.results
            .iter()
            .flat_map(|r| r.targets.iter())
            .filter(|o| o.status != CheckStatus::Pass && o.failure.is_some())
            .map(|o| o.target.clone())
            .collect()
    }

    /// All observations recorded for a target, across results.
    pub fn observations_for<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = &'a TargetObservation> + 'a {
        self.results
            .iter()
            .flat_map(|r| r.targets.iter())
            .filter(move |o| o.target == target)
    }
}

/// A report together with its store-assigned identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: ReportId,
    #[serde(flatten)]
    pub report: Report,
}

/// Compact listing entry for report history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: ReportId,
    pub timestamp_ms: u64,
    pub overall_status: CheckStatus,
    pub cycle_duration_ms: u64,
    pub trigger: TriggerSource,
    pub summary: Summary,
}

impl From<&StoredReport> for ReportSummary {
    fn from(stored: &StoredReport) -> Self {
        Self {
            id: stored.id,
            timestamp_ms: stored.report.timestamp_ms,
            overall_status: stored.report.overall_status,
            cycle_duration_ms: stored.report.cycle_duration.as_millis() as u64,
            trigger: stored.report.trigger,
            summary: stored.report.summary(),
        }
    }
}

/// One observation row persisted alongside a report, used for trends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    pub report_id: ReportId,
    pub timestamp_ms: u64,
    pub check: String,
    pub target: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

// ── Repair ─────────────────────────────────────────────────────────

/// Repair strategy preferred by a policy or chosen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    Restart,
    Rebuild,
    Rollback,
    None,
}

impl RepairStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairStrategy::Restart => "restart",
            RepairStrategy::Rebuild => "rebuild",
            RepairStrategy::Rollback => "rollback",
            RepairStrategy::None => "none",
        }
    }
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RepairStrategy {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" => Ok(RepairStrategy::Restart),
            "rebuild" => Ok(RepairStrategy::Rebuild),
            "rollback" => Ok(RepairStrategy::Rollback),
            "none" => Ok(RepairStrategy::None),
            other => Err(StateError::InvalidPolicy(format!(
                "unknown repair strategy: {other}"
            ))),
        }
    }
}

/// Category of a target's problem, used to pick a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Timeout,
    Crash,
    Dependency,
    Security,
    None,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueType::Timeout => "timeout",
            IssueType::Crash => "crash",
            IssueType::Dependency => "dependency",
            IssueType::Security => "security",
            IssueType::None => "none",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepairStatus::Succeeded => "succeeded",
            RepairStatus::Failed => "failed",
            RepairStatus::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// A recorded repair attempt (or skip).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAction {
    /// Assigned by the store; zero until stored.
    #[serde(default)]
    pub id: RepairId,
    pub target: String,
    pub issue_type: IssueType,
    pub strategy: RepairStrategy,
    pub status: RepairStatus,
    /// Unix timestamp (milliseconds) when the action started.
    pub started_at_ms: u64,
    pub duration: Duration,
    /// Report that triggered the action; `None` for operator repairs.
    pub triggering_report_id: Option<ReportId>,
    #[serde(default)]
    pub manual: bool,
    /// Error text for failures, reason for skips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Policy ─────────────────────────────────────────────────────────

/// Per-target health and repair configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub target: String,
    pub max_response_time_ms: u64,
    pub auto_repair_enabled: bool,
    pub repair_strategy: RepairStrategy,
    /// Unix timestamp (milliseconds) of the last explicit update.
    #[serde(default)]
    pub last_updated_ms: u64,
}

impl Policy {
    pub fn new(
        target: impl Into<String>,
        max_response_time_ms: u64,
        auto_repair_enabled: bool,
        repair_strategy: RepairStrategy,
    ) -> Self {
        Self {
            target: target.into(),
            max_response_time_ms,
            auto_repair_enabled,
            repair_strategy,
            last_updated_ms: 0,
        }
    }
}

// ── Trends ─────────────────────────────────────────────────────────

/// Status of one target in one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub report_id: ReportId,
    pub timestamp_ms: u64,
    pub status: CheckStatus,
    pub score: u8,
}

/// Time-windowed aggregate for one target, computed at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub target: String,
    pub since_ms: u64,
    /// Number of detail rows considered.
    pub samples: usize,
    pub avg_response_time_ms: Option<f64>,
    pub peak_response_time_ms: Option<u64>,
    /// Fraction of points whose status is `fail`.
    pub failure_rate: f64,
    /// Oldest first.
    pub status_over_time: Vec<TrendPoint>,
}
