//! Orchestrator — runs one cycle's checkers concurrently and aggregates
//! their results into a `Report`.
//!
//! Every checker runs as its own tokio task bounded by
//! `min(cycle deadline, start + per-check timeout)`. Nothing short-circuits:
//! a slow, cancelled or panicking checker still yields exactly one result,
//! and results keep checker order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use sentinel_core::epoch_millis;
use sentinel_state::{
    CheckKind, CheckResult, CheckStatus, FailureKind, Report, TargetObservation, TriggerSource,
};

use crate::checker::{CheckContext, Checker};

#[derive(Debug, Clone, Copy)]
pub struct Orchestrator {
    cycle_timeout: Duration,
    check_timeout: Duration,
}

impl Orchestrator {
    pub fn new(cycle_timeout: Duration, check_timeout: Duration) -> Self {
        Self {
            cycle_timeout,
            check_timeout,
        }
    }

    /// Run every checker once and build the cycle's report.
    pub async fn run_all(
        &self,
        checkers: &[Arc<dyn Checker>],
        trigger: TriggerSource,
        cancel: watch::Receiver<bool>,
    ) -> Report {
        let timestamp_ms = epoch_millis();
        let started = Instant::now();
        let cycle_deadline = started + self.cycle_timeout;
        debug!(checkers = checkers.len(), %trigger, "cycle starting");

        let mut handles = Vec::with_capacity(checkers.len());
        for checker in checkers {
            let deadline = (Instant::now() + self.check_timeout).min(cycle_deadline);
            let ctx = CheckContext::new(deadline, cancel.clone());
            let name = checker.name().to_string();
            let checker = checker.clone();
            let handle = tokio::spawn(async move { run_bounded(checker, ctx).await });
            handles.push((name, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(checker = %name, error = %e, "checker task aborted");
                    results.push(CheckResult::fail(
                        name,
                        CheckKind::Internal,
                        format!("checker task aborted: {e}"),
                    ));
                }
            }
        }

        let report = Report::new(results, trigger, timestamp_ms, started.elapsed());
        let summary = report.summary();
        info!(
            status = %report.overall_status,
            passed = summary.passed,
            warned = summary.warned,
            failed = summary.failed,
            duration_ms = report.cycle_duration.as_millis() as u64,
            "cycle complete"
        );
        report
    }
}

async fn run_bounded(checker: Arc<dyn Checker>, ctx: CheckContext) -> CheckResult {
    let started = Instant::now();
    let result = tokio::select! {
        biased;
        _ = ctx.cancelled() => {
            debug!(checker = checker.name(), "checker cancelled");
            CheckResult::fail(checker.name(), checker.kind(), "cancelled")
        }
        outcome = tokio::time::timeout_at(ctx.deadline(), checker.run(&ctx)) => match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(checker = checker.name(), "checker timed out");
                timed_out(checker.as_ref())
            }
        },
    };
    result.with_duration(started.elapsed())
}

/// Result for a checker that overran its bound. Each target it covers is
/// recorded as timed out.
fn timed_out(checker: &dyn Checker) -> CheckResult {
    let observations = checker
        .targets()
        .into_iter()
        .map(|t| TargetObservation::failing(t, CheckStatus::Fail, FailureKind::Timeout))
        .collect();
    CheckResult::fail(checker.name(), checker.kind(), "timed out").with_targets(observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HangingChecker, PanickingChecker, StaticChecker};

    fn fixed(name: &str, status: CheckStatus) -> Arc<dyn Checker> {
        Arc::new(StaticChecker::new(CheckResult::new(
            name,
            CheckKind::Http,
            status,
            "fixed",
        )))
    }

    fn never_cancelled() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn aggregates_worst_status_in_checker_order() {
        let orch = Orchestrator::new(Duration::from_secs(5), Duration::from_secs(1));
        let checkers = vec![
            fixed("a", CheckStatus::Pass),
            fixed("b", CheckStatus::Pass),
            fixed("c", CheckStatus::Warn),
        ];
        let report = orch
            .run_all(&checkers, TriggerSource::Scheduled, never_cancelled())
            .await;

        assert_eq!(report.overall_status, CheckStatus::Warn);
        let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(report.trigger, TriggerSource::Scheduled);
    }

    #[tokio::test]
    async fn no_checkers_pass() {
        let orch = Orchestrator::new(Duration::from_secs(1), Duration::from_secs(1));
        let report = orch.run_all(&[], TriggerSource::Manual, never_cancelled()).await;
        assert_eq!(report.overall_status, CheckStatus::Pass);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn hanging_checker_times_out_within_bound() {
        let orch = Orchestrator::new(Duration::from_secs(5), Duration::from_millis(100));
        let checkers = vec![
            fixed("ok", CheckStatus::Pass),
            Arc::new(HangingChecker::new("stuck")) as Arc<dyn Checker>,
        ];

        let started = std::time::Instant::now();
        let report = orch
            .run_all(&checkers, TriggerSource::Manual, never_cancelled())
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.overall_status, CheckStatus::Fail);
        assert_eq!(report.results[0].status, CheckStatus::Pass);
        assert_eq!(report.results[1].status, CheckStatus::Fail);
        assert_eq!(report.results[1].message, "timed out");
    }

    #[tokio::test]
    async fn cycle_deadline_caps_per_check_timeout() {
        let orch = Orchestrator::new(Duration::from_millis(100), Duration::from_secs(30));
        let checkers: Vec<Arc<dyn Checker>> = vec![Arc::new(HangingChecker::new("stuck"))];

        let started = std::time::Instant::now();
        let report = orch
            .run_all(&checkers, TriggerSource::Manual, never_cancelled())
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.results[0].status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn cancellation_fails_in_flight_checkers() {
        let orch = Orchestrator::new(Duration::from_secs(30), Duration::from_secs(30));
        let checkers: Vec<Arc<dyn Checker>> = vec![Arc::new(HangingChecker::new("stuck"))];
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(async move {
            orch.run_all(&checkers, TriggerSource::Scheduled, rx).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.results[0].status, CheckStatus::Fail);
        assert_eq!(report.results[0].message, "cancelled");
    }

    #[tokio::test]
    async fn panicking_checker_becomes_internal_failure() {
        let orch = Orchestrator::new(Duration::from_secs(5), Duration::from_secs(1));
        let checkers = vec![
            fixed("ok", CheckStatus::Pass),
            Arc::new(PanickingChecker::new("boom")) as Arc<dyn Checker>,
        ];
        let report = orch
            .run_all(&checkers, TriggerSource::Manual, never_cancelled())
            .await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].name, "boom");
        assert_eq!(report.results[1].kind, CheckKind::Internal);
        assert_eq!(report.overall_status, CheckStatus::Fail);
    }
}
