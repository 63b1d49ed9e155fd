//! Report rendering for the CLI.

use std::fmt::Write;

use sentinel_state::{CheckStatus, Report};

const RULE_HEAVY: &str = "═══════════════════════════════════════════════════════════════";
const RULE_LIGHT: &str = "───────────────────────────────────────────────────────────────";

/// Pretty-printed JSON.
pub fn format_json(report: &Report) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn symbol(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "✓",
        CheckStatus::Warn => "⚠",
        CheckStatus::Fail => "✗",
    }
}

/// Boxed plain-text rendering with per-check details.
pub fn format_human(report: &Report) -> String {
    let mut out = String::new();
    let summary = report.summary();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{RULE_HEAVY}");
    let _ = writeln!(out, "  Sentinel Health Check");
    let _ = writeln!(out, "{RULE_HEAVY}\n");
    let _ = writeln!(out, "Timestamp:   {} (epoch ms)", report.timestamp_ms);
    let _ = writeln!(out, "Trigger:     {}\n", report.trigger);
    let _ = writeln!(
        out,
        "Overall Status: {} {}\n",
        symbol(report.overall_status),
        report.overall_status
    );

    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  Total Checks:  {}", summary.total);
    let _ = writeln!(out, "  ✓ Passed:      {}", summary.passed);
    if summary.warned > 0 {
        let _ = writeln!(out, "  ⚠ Warnings:    {}", summary.warned);
    }
    if summary.failed > 0 {
        let _ = writeln!(out, "  ✗ Failed:      {}", summary.failed);
    }
    let _ = writeln!(out, "  Duration:      {:?}\n", report.cycle_duration);

    let _ = writeln!(out, "Detailed Results:");
    let _ = writeln!(out, "{RULE_LIGHT}");
    for result in &report.results {
        let _ = writeln!(out, "\n{} {}", symbol(result.status), result.name);
        let _ = writeln!(out, "  Status:   {}", result.status);
        let _ = writeln!(out, "  Message:  {}", result.message);
        let _ = writeln!(out, "  Duration: {:?}", result.duration);
        if !result.details.is_empty() {
            let _ = writeln!(out, "  Details:");
            for (key, value) in &result.details {
                let _ = writeln!(out, "    {key}: {value}");
            }
        }
    }
    let _ = writeln!(out, "\n{RULE_HEAVY}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_state::{CheckKind, CheckResult, TriggerSource};
    use std::time::Duration;

    fn report() -> Report {
        Report::new(
            vec![
                CheckResult::pass("containers", CheckKind::Container, "all 2 services running"),
                CheckResult::fail("http_api", CheckKind::Http, "HTTP 503")
                    .with_detail("status_code", 503),
            ],
            TriggerSource::Manual,
            1_700_000_000_000,
            Duration::from_millis(42),
        )
    }

    #[test]
    fn human_output_lists_checks_and_counts() {
        let text = format_human(&report());
        assert!(text.contains("Overall Status: ✗ fail"));
        assert!(text.contains("✓ containers"));
        assert!(text.contains("✗ http_api"));
        assert!(text.contains("status_code: 503"));
        assert!(text.contains("✗ Failed:      1"));
        assert!(!text.contains("Warnings"));
    }

    #[test]
    fn json_output_is_parseable() {
        let json = format_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["overall_status"], "fail");
        assert_eq!(value["results"][1]["name"], "http_api");
    }
}
