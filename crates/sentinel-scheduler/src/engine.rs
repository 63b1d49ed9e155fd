//! HealthEngine — the outward API over scheduling, history and policies.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use sentinel_core::SentinelConfig;
use sentinel_health::{Checker, ComposeRuntime, ContainerRuntime, checks};
use sentinel_repair::RepairEngine;
use sentinel_state::{
    Policy, PolicyDefaults, PolicyStore, RepairAction, RepairStrategy, ReportId, ReportSummary,
    StateStore, StoredReport, Trend,
};

use crate::error::SchedulerResult;
use crate::scheduler::{CycleOutcome, Scheduler, SchedulerSettings};

pub struct HealthEngine {
    scheduler: Scheduler,
    state: StateStore,
    policies: PolicyStore,
    repair: RepairEngine,
}

impl HealthEngine {
    pub fn new(
        settings: SchedulerSettings,
        checkers: Vec<Arc<dyn Checker>>,
        repair: RepairEngine,
        state: StateStore,
        policies: PolicyStore,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(settings, checkers, repair.clone(), state.clone()),
            state,
            policies,
            repair,
        }
    }

    /// Open the configured store and build the engine with `docker compose`
    /// (or the configured command templates) as the runtime.
    pub fn from_config(config: &SentinelConfig) -> SchedulerResult<Self> {
        let state = StateStore::open(&config.storage_path())?;
        let runtime = ComposeRuntime::new(&config.runtime.clone().unwrap_or_default());
        Self::with_runtime(config, state, Arc::new(runtime))
    }

    /// Build the engine on an already open store and a given runtime.
    /// Default policies are seeded into the store.
    pub fn with_runtime(
        config: &SentinelConfig,
        state: StateStore,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> SchedulerResult<Self> {
        let defaults = PolicyDefaults::from_config(&config.policies)?;
        let policies = PolicyStore::new(state.clone(), defaults);
        let seeded = policies.initialize_defaults()?;
        info!(seeded, "policy store ready");

        let containers: BTreeMap<String, String> = config
            .targets
            .iter()
            .map(|t| (t.name.clone(), t.container_name().to_string()))
            .collect();
        let repair = RepairEngine::new(Arc::clone(&runtime), policies.clone(), state.clone())
            .with_containers(containers);
        let checkers = checks::from_config(config, runtime, policies.clone());

        Ok(Self::new(
            SchedulerSettings::from_config(config),
            checkers,
            repair,
            state,
            policies,
        ))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub async fn start(&self) -> SchedulerResult<()> {
        self.scheduler.start().await
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await
    }

    pub async fn trigger_cycle(&self) -> SchedulerResult<CycleOutcome> {
        self.scheduler.trigger_cycle().await
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Most recent report. Falls back to the last report this process
    /// produced when the store cannot be read; `None` means no data yet.
    pub fn latest_report(&self) -> Option<StoredReport> {
        match self.state.latest_report() {
            Ok(Some(report)) => Some(report),
            Ok(None) => self.scheduler.latest_cached(),
            Err(e) => {
                warn!(error = %e, "latest report unavailable, serving cached copy");
                self.scheduler.latest_cached()
            }
        }
    }

    pub fn report(&self, id: ReportId) -> SchedulerResult<Option<StoredReport>> {
        Ok(self.state.get_report(id)?)
    }

    /// Newest first.
    pub fn history(&self, limit: usize) -> SchedulerResult<Vec<ReportSummary>> {
        Ok(self.state.recent(limit)?)
    }

    pub fn trend(&self, target: &str, window: Duration) -> SchedulerResult<Trend> {
        Ok(self.state.trend(target, window)?)
    }

    pub fn repair_history(&self, limit: usize) -> SchedulerResult<Vec<RepairAction>> {
        Ok(self.state.repair_history(limit)?)
    }

    // ── Commands ────────────────────────────────────────────────────

    pub fn policy(&self, target: &str) -> SchedulerResult<Policy> {
        Ok(self.policies.get(target)?)
    }

    pub fn policies(&self) -> SchedulerResult<Vec<Policy>> {
        Ok(self.policies.get_all()?)
    }

    pub fn update_policy(&self, policy: Policy) -> SchedulerResult<Policy> {
        Ok(self.policies.upsert(policy)?)
    }

    pub fn reset_policy(&self, target: &str) -> SchedulerResult<Policy> {
        Ok(self.policies.reset(target)?)
    }

    pub async fn manual_repair(
        &self,
        target: &str,
        strategy: RepairStrategy,
    ) -> SchedulerResult<RepairAction> {
        Ok(self.repair.manual_repair(target, strategy).await?)
    }
}
