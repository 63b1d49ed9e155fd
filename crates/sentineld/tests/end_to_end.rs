//! End-to-end cycle tests.
//!
//! Drives full cycles through `HealthEngine` (checkers → report → store →
//! repair → repair log) with fake runtimes and local HTTP stubs in place of
//! real containers.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use sentinel_core::SentinelConfig;
use sentinel_health::Checker;
use sentinel_health::checks::HttpChecker;
use sentinel_health::testing::{
    HangingChecker, RecordingRuntime, RuntimeCall, StaticChecker, spawn_http_stub,
};
use sentinel_repair::RepairEngine;
use sentinel_scheduler::{HealthEngine, SchedulerSettings};
use sentinel_state::testing::FailingBackend;
use sentinel_state::*;

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        interval: Duration::from_secs(3600),
        cycle_timeout: Duration::from_secs(5),
        check_timeout: Duration::from_millis(300),
        retention: Duration::from_secs(30 * 86_400),
        cleanup_interval: Duration::from_secs(3600),
    }
}

fn policies(state: &StateStore, api_auto_repair: bool) -> PolicyStore {
    let defaults = PolicyDefaults::new(Policy::new("*", 1000, false, RepairStrategy::Restart))
        .with_policy(Policy::new("api", 200, api_auto_repair, RepairStrategy::Restart));
    PolicyStore::new(state.clone(), defaults)
}

struct Harness {
    engine: HealthEngine,
    runtime: RecordingRuntime,
    state: StateStore,
}

fn harness(
    settings: SchedulerSettings,
    api_auto_repair: bool,
    checkers: impl FnOnce(&PolicyStore) -> Vec<Arc<dyn Checker>>,
) -> Harness {
    let state = StateStore::open_in_memory().unwrap();
    harness_on(state, settings, api_auto_repair, checkers)
}

fn harness_on(
    state: StateStore,
    settings: SchedulerSettings,
    api_auto_repair: bool,
    checkers: impl FnOnce(&PolicyStore) -> Vec<Arc<dyn Checker>>,
) -> Harness {
    let policies = policies(&state, api_auto_repair);
    let runtime = RecordingRuntime::new();
    let repair = RepairEngine::new(Arc::new(runtime.clone()), policies.clone(), state.clone());
    let checkers = checkers(&policies);
    Harness {
        engine: HealthEngine::new(settings, checkers, repair, state.clone(), policies),
        runtime,
        state,
    }
}

fn fixed(name: &str, status: CheckStatus) -> Arc<dyn Checker> {
    Arc::new(StaticChecker::new(CheckResult::new(
        name,
        CheckKind::Http,
        status,
        "fixed",
    )))
}

#[tokio::test]
async fn worst_result_wins_and_warn_repairs_nothing() {
    let h = harness(settings(), true, |_| {
        vec![
            fixed("a", CheckStatus::Pass),
            fixed("b", CheckStatus::Pass),
            fixed("c", CheckStatus::Warn),
        ]
    });

    let outcome = h.engine.trigger_cycle().await.unwrap();
    assert_eq!(outcome.report.report.overall_status, CheckStatus::Warn);
    assert!(outcome.repairs.is_empty());
    assert!(h.runtime.calls().is_empty());

    let history = h.engine.history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].summary.warned, 1);
}

#[tokio::test]
async fn slow_api_is_restarted_and_logged() {
    let addr = spawn_http_stub(200, Duration::from_secs(3)).await;
    let url = format!("http://{addr}/health");
    let h = harness(settings(), true, |policies| {
        vec![
            fixed("containers", CheckStatus::Pass),
            Arc::new(HttpChecker::new(
                "api",
                url,
                policies.clone(),
                Duration::from_millis(150),
            )) as Arc<dyn Checker>,
        ]
    });

    let outcome = h.engine.trigger_cycle().await.unwrap();
    let report = &outcome.report;
    assert_eq!(report.report.overall_status, CheckStatus::Fail);
    assert!(report.report.affected_targets().contains("api"));

    assert_eq!(outcome.repairs.len(), 1);
    let action = &outcome.repairs[0];
    assert_eq!(action.target, "api");
    assert_eq!(action.issue_type, IssueType::Timeout);
    assert_eq!(action.strategy, RepairStrategy::Restart);
    assert_eq!(action.status, RepairStatus::Succeeded);
    assert_eq!(action.triggering_report_id, Some(report.id));
    assert_eq!(h.runtime.calls(), vec![RuntimeCall::Restart("api".into())]);

    let logged = h.engine.repair_history(10).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].triggering_report_id, Some(report.id));
}

#[tokio::test]
async fn disabled_policy_only_records_skips() {
    let failing = CheckResult::fail("http_api", CheckKind::Http, "connection refused")
        .with_target(TargetObservation::failing(
            "api",
            CheckStatus::Fail,
            FailureKind::ConnectionRefused,
        ));
    let h = harness(settings(), false, move |_| {
        vec![Arc::new(StaticChecker::new(failing)) as Arc<dyn Checker>]
    });

    let outcome = h.engine.trigger_cycle().await.unwrap();
    assert_eq!(outcome.repairs.len(), 1);
    assert_eq!(outcome.repairs[0].status, RepairStatus::Skipped);
    assert_eq!(outcome.repairs[0].strategy, RepairStrategy::Restart);
    assert!(h.runtime.calls().is_empty());
    assert_eq!(h.state.repairs_for_target("api", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn hanging_checker_is_bounded_by_cycle_deadline() {
    let mut tight = settings();
    tight.cycle_timeout = Duration::from_millis(200);
    tight.check_timeout = Duration::from_secs(30);
    let h = harness(tight, true, |_| {
        vec![
            fixed("ok", CheckStatus::Pass),
            Arc::new(HangingChecker::new("stuck")) as Arc<dyn Checker>,
        ]
    });

    let started = Instant::now();
    let outcome = h.engine.trigger_cycle().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let results = &outcome.report.report.results;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, CheckStatus::Pass);
    assert_eq!(results[1].status, CheckStatus::Fail);
    assert_eq!(results[1].message, "timed out");
}

#[tokio::test]
async fn stop_mid_cycle_stores_cancelled_report() {
    let mut slow = settings();
    slow.cycle_timeout = Duration::from_secs(30);
    slow.check_timeout = Duration::from_secs(30);
    let h = harness(slow, true, |_| {
        vec![Arc::new(HangingChecker::new("stuck")) as Arc<dyn Checker>]
    });

    h.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    h.engine.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let latest = h.engine.latest_report().unwrap();
    assert_eq!(latest.report.trigger, TriggerSource::Scheduled);
    assert_eq!(latest.report.results[0].message, "cancelled");
    assert!(h.engine.trigger_cycle().await.is_err());
    assert_eq!(h.state.report_count().unwrap(), 1);
}

#[tokio::test]
async fn slow_but_passing_api_never_fills_repair_log() {
    let slow = CheckResult::warn("http_api", CheckKind::Http, "slow response").with_target(
        TargetObservation::failing("api", CheckStatus::Warn, FailureKind::Slow)
            .with_response_time(450),
    );
    let h = harness(settings(), true, move |_| {
        vec![Arc::new(StaticChecker::new(slow)) as Arc<dyn Checker>]
    });

    for _ in 0..3 {
        let outcome = h.engine.trigger_cycle().await.unwrap();
        assert_eq!(outcome.report.report.overall_status, CheckStatus::Warn);
        assert!(outcome.repairs.is_empty());
    }
    assert_eq!(h.engine.history(10).unwrap().len(), 3);
    assert!(h.engine.repair_history(10).unwrap().is_empty());
    assert!(h.runtime.calls().is_empty());
}

#[tokio::test]
async fn failed_report_write_still_repairs_and_serves_latest() {
    let backend = FailingBackend::new();
    let switch = backend.switch();
    let state = StateStore::open_with_backend(backend).unwrap();
    let refused = CheckResult::fail("http_api", CheckKind::Http, "connection refused")
        .with_target(TargetObservation::failing(
            "api",
            CheckStatus::Fail,
            FailureKind::ConnectionRefused,
        ));
    let h = harness_on(state, settings(), true, move |_| {
        vec![Arc::new(StaticChecker::new(refused)) as Arc<dyn Checker>]
    });
    switch.store(true, Ordering::SeqCst);

    let outcome = h.engine.trigger_cycle().await.unwrap();
    assert_eq!(outcome.report.id, 0);
    assert_eq!(outcome.repairs.len(), 1);
    assert_eq!(outcome.repairs[0].status, RepairStatus::Succeeded);
    assert_eq!(h.runtime.calls(), vec![RuntimeCall::Restart("api".into())]);

    let latest = h.engine.latest_report().unwrap();
    assert_eq!(latest.id, 0);
    assert_eq!(latest.report.overall_status, CheckStatus::Fail);
}

#[tokio::test(start_paused = true)]
async fn long_cycles_do_not_run_back_to_back() {
    let mut tight = settings();
    tight.interval = Duration::from_millis(100);
    tight.cycle_timeout = Duration::from_millis(150);
    tight.check_timeout = Duration::from_secs(30);
    let h = harness(tight, true, |_| {
        vec![Arc::new(HangingChecker::new("stuck")) as Arc<dyn Checker>]
    });

    h.engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(950)).await;
    h.engine.stop().await;

    // 150ms cycles on a 100ms interval start at 0, 200, 400, 600 and 800.
    // Starting each one as the previous ends would fit seven.
    let stored = h.state.report_count().unwrap();
    assert!((4..=5).contains(&stored), "{stored} cycles ran");
}

#[tokio::test]
async fn history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sentinel.redb");
    let config: SentinelConfig = toml::from_str(&format!(
        r#"
[storage]
path = "{}"

[[targets]]
name = "portal"
"#,
        db_path.display()
    ))
    .unwrap();

    {
        let state = StateStore::open(&db_path).unwrap();
        let runtime = RecordingRuntime::new().with_running(&["portal"]);
        let engine = HealthEngine::with_runtime(&config, state, Arc::new(runtime)).unwrap();
        engine.trigger_cycle().await.unwrap();
        engine
            .manual_repair("portal", RepairStrategy::Restart)
            .await
            .unwrap();
    }

    let engine = HealthEngine::from_config(&config).unwrap();
    assert_eq!(engine.history(10).unwrap().len(), 1);
    let repairs = engine.repair_history(10).unwrap();
    assert_eq!(repairs.len(), 1);
    assert!(repairs[0].manual);
    assert!(engine.latest_report().is_some());
}
