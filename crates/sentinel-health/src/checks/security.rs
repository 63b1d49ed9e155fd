//! Security scan: runs the vulnerability scanner per image and grades the
//! severity counts it reports.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use sentinel_core::config::IMAGE_PLACEHOLDER;
use sentinel_state::{CheckKind, CheckResult, CheckStatus, FailureKind, TargetObservation};

use crate::checker::{CheckContext, Checker};
use crate::runtime::{CommandOutput, capture_command, render};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    fn add(&mut self, other: SeverityCounts) {
        self.critical += other.critical;
        self.high += other.high;
        self.medium += other.medium;
        self.low += other.low;
    }

    /// Status and failure recorded for an image with these counts.
    pub fn grade(&self) -> (CheckStatus, Option<FailureKind>) {
        if self.critical > 0 {
            (CheckStatus::Fail, Some(FailureKind::CriticalVulnerability))
        } else if self.high > 0 {
            (CheckStatus::Warn, Some(FailureKind::HighVulnerability))
        } else if self.medium > 0 {
            (CheckStatus::Warn, None)
        } else {
            (CheckStatus::Pass, None)
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScanReport {
    #[serde(default)]
    results: Option<Vec<ScanTarget>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScanTarget {
    #[serde(default)]
    vulnerabilities: Option<Vec<Vulnerability>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vulnerability {
    severity: String,
}

/// Count severities in Trivy-style JSON output. Empty output means a clean
/// image.
pub fn parse_scan(output: &str) -> Result<SeverityCounts, serde_json::Error> {
    let mut counts = SeverityCounts::default();
    if output.trim().is_empty() {
        return Ok(counts);
    }
    let report: ScanReport = serde_json::from_str(output)?;
    for target in report.results.unwrap_or_default() {
        for vuln in target.vulnerabilities.unwrap_or_default() {
            match vuln.severity.to_ascii_uppercase().as_str() {
                "CRITICAL" => counts.critical += 1,
                "HIGH" => counts.high += 1,
                "MEDIUM" => counts.medium += 1,
                "LOW" => counts.low += 1,
                _ => {}
            }
        }
    }
    Ok(counts)
}

/// A target and the image it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedImage {
    pub target: String,
    pub image: String,
}

#[derive(Debug, Serialize)]
struct ImageScan {
    image: String,
    #[serde(flatten)]
    counts: SeverityCounts,
}

pub struct SecurityChecker {
    images: Vec<ScannedImage>,
    command: Vec<String>,
    timeout: Duration,
}

impl SecurityChecker {
    pub fn new(images: Vec<ScannedImage>, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            images,
            command,
            timeout,
        }
    }

    /// Scanners exit non-zero when they find vulnerabilities, so a failed
    /// exit still counts as a scan if it printed a readable report.
    async fn scan(&self, image: &str, budget: Duration) -> Result<SeverityCounts, String> {
        let argv = render(&self.command, IMAGE_PLACEHOLDER, image);
        let output = capture_command(&argv, budget)
            .await
            .map_err(|e| e.to_string())?;
        let has_report = !output.stdout.trim().is_empty();
        match parse_scan(&output.stdout) {
            Ok(counts) if output.success() || has_report => Ok(counts),
            Err(e) if output.success() => Err(format!("unreadable scanner output: {e}")),
            _ => Err(exit_message(&output)),
        }
    }
}

fn exit_message(output: &CommandOutput) -> String {
    match output.code {
        Some(code) => format!("scanner exited with {code}: {}", output.stderr),
        None => format!("scanner killed: {}", output.stderr),
    }
}

#[async_trait]
impl Checker for SecurityChecker {
    fn name(&self) -> &str {
        "security"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Security
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started = Instant::now();
        if self.images.is_empty() {
            return CheckResult::warn(self.name(), self.kind(), "no images configured for scanning")
                .with_duration(started.elapsed());
        }

        let mut totals = SeverityCounts::default();
        let mut scans = Vec::new();
        let mut failed = Vec::new();
        let mut observations = Vec::new();
        for entry in &self.images {
            let budget = ctx.budget(self.timeout);
            if budget.is_zero() || ctx.is_cancelled() {
                failed.push(format!("{} (not scanned)", entry.image));
                continue;
            }
            match self.scan(&entry.image, budget).await {
                Ok(counts) => {
                    totals.add(counts);
                    let (status, failure) = counts.grade();
                    observations.push(TargetObservation {
                        target: entry.target.clone(),
                        status,
                        response_time_ms: None,
                        failure,
                    });
                    scans.push(ImageScan {
                        image: entry.image.clone(),
                        counts,
                    });
                }
                Err(e) => {
                    warn!(image = %entry.image, error = %e, "image scan failed");
                    observations.push(TargetObservation::failing(
                        &entry.target,
                        CheckStatus::Warn,
                        FailureKind::ProbeError,
                    ));
                    failed.push(format!("{} ({e})", entry.image));
                }
            }
        }

        let (mut status, _) = totals.grade();
        let mut message = if totals.critical > 0 {
            format!(
                "critical vulnerabilities found: {} critical, {} high",
                totals.critical, totals.high
            )
        } else if totals.high > 0 {
            format!(
                "high vulnerabilities found: {} high, {} medium",
                totals.high, totals.medium
            )
        } else if totals.medium > 0 {
            format!(
                "medium vulnerabilities found: {} medium, {} low",
                totals.medium, totals.low
            )
        } else {
            format!("no vulnerabilities found in {} image(s)", scans.len())
        };

        if scans.is_empty() {
            status = CheckStatus::Fail;
            message = format!("failed to scan all {} image(s)", self.images.len());
        } else if !failed.is_empty() {
            status = status.max(CheckStatus::Warn);
            message = format!("{message}; {} image(s) not scanned", failed.len());
        }

        let mut result = CheckResult::new(self.name(), self.kind(), status, message)
            .with_detail("images_scanned", scans.len())
            .with_detail("critical", totals.critical)
            .with_detail("high", totals.high)
            .with_detail("medium", totals.medium)
            .with_detail("low", totals.low)
            .with_detail("scans", serde_json::to_value(&scans).unwrap_or_default());
        if !failed.is_empty() {
            result = result.with_detail("failed_images", failed);
        }
        result
            .with_targets(observations)
            .with_duration(started.elapsed())
    }
}
