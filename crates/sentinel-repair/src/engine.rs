//! RepairEngine — executes repair decisions against the container runtime
//! and records every outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use sentinel_core::epoch_millis;
use sentinel_health::runtime::{ContainerRuntime, RuntimeResult};
use sentinel_state::{
    IssueType, PolicyStore, RepairAction, RepairStatus, RepairStrategy, ReportId, StateStore,
    StoredReport,
};

use crate::decision::{classify, strategy};
use crate::error::{RepairError, RepairResult};

#[derive(Clone)]
pub struct RepairEngine {
    runtime: Arc<dyn ContainerRuntime>,
    policies: PolicyStore,
    state: StateStore,
    /// Target name → runtime service name. Unmapped targets use their own name.
    containers: Arc<BTreeMap<String, String>>,
}

impl RepairEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        policies: PolicyStore,
        state: StateStore,
    ) -> Self {
        Self {
            runtime,
            policies,
            state,
            containers: Arc::new(BTreeMap::new()),
        }
    }

    pub fn with_containers(mut self, containers: BTreeMap<String, String>) -> Self {
        self.containers = Arc::new(containers);
        self
    }

    /// Decide and act on every affected target of a stored report.
    ///
    /// Targets whose observations classify to no issue (warn-only slowness,
    /// high-severity findings) are passed over without a record. The rest
    /// are repaired concurrently; the returned actions are sorted by
    /// target. A storage failure while recording an action is logged and the
    /// action is still returned.
    pub async fn handle_report(
        &self,
        stored: &StoredReport,
        cancel: watch::Receiver<bool>,
    ) -> Vec<RepairAction> {
        let issues: Vec<(String, IssueType)> = stored
            .report
            .affected_targets()
            .into_iter()
            .map(|target| {
                let issue = classify(&stored.report, &target);
                (target, issue)
            })
            .filter(|(_, issue)| *issue != IssueType::None)
            .collect();
        if issues.is_empty() {
            return Vec::new();
        }
        debug!(report_id = stored.id, targets = issues.len(), "evaluating repairs");

        let mut tasks = JoinSet::new();
        for (target, issue) in issues {
            let engine = self.clone();
            let cancel = cancel.clone();
            let report_id = stored.id;
            tasks.spawn(async move {
                engine
                    .repair_target(target, issue, report_id, cancel)
                    .await
            });
        }

        let mut actions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(action) => actions.push(action),
                Err(e) => error!(error = %e, "repair task aborted"),
            }
        }
        actions.sort_by(|a, b| a.target.cmp(&b.target));

        for action in &mut actions {
            self.record(action);
        }
        actions
    }

    /// Run an operator-chosen strategy, ignoring `auto_repair_enabled`.
    pub async fn manual_repair(
        &self,
        target: &str,
        strategy: RepairStrategy,
    ) -> RepairResult<RepairAction> {
        if strategy == RepairStrategy::None {
            return Err(RepairError::InvalidStrategy(format!(
                "'{strategy}' cannot be executed"
            )));
        }
        info!(%target, %strategy, "manual repair requested");

        let mut action = self.execute(target, IssueType::None, strategy).await;
        action.manual = true;
        action.id = self.state.store_repair_action(&action)?;
        Ok(action)
    }

    async fn repair_target(
        &self,
        target: String,
        issue: IssueType,
        report_id: ReportId,
        cancel: watch::Receiver<bool>,
    ) -> RepairAction {
        let policy = match self.policies.get(&target) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(%target, error = %e, "policy lookup failed, using defaults");
                self.policies.defaults().get(&target)
            }
        };
        let chosen = strategy(issue, &policy);

        let mut action = if chosen == RepairStrategy::None {
            debug!(%target, %issue, "no repair applicable");
            skipped(&target, issue, chosen, "no repair applicable")
        } else if !policy.auto_repair_enabled {
            info!(%target, %issue, strategy = %chosen, "auto-repair disabled, skipping");
            skipped(&target, issue, chosen, "auto-repair disabled")
        } else if *cancel.borrow() {
            info!(%target, strategy = %chosen, "repair aborted by shutdown");
            skipped(&target, issue, chosen, "aborted")
        } else {
            self.execute(&target, issue, chosen).await
        };
        action.triggering_report_id = Some(report_id);
        action
    }

    async fn execute(
        &self,
        target: &str,
        issue: IssueType,
        chosen: RepairStrategy,
    ) -> RepairAction {
        let service = self
            .containers
            .get(target)
            .map(String::as_str)
            .unwrap_or(target);
        let started_at_ms = epoch_millis();
        let started = Instant::now();
        info!(%target, %service, %issue, strategy = %chosen, "executing repair");

        let outcome = self.dispatch(chosen, service).await;
        let (status, message) = match outcome {
            Ok(()) => {
                info!(
                    %target,
                    strategy = %chosen,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "repair succeeded"
                );
                (RepairStatus::Succeeded, None)
            }
            Err(e) => {
                warn!(%target, strategy = %chosen, error = %e, "repair failed");
                (RepairStatus::Failed, Some(e.to_string()))
            }
        };

        RepairAction {
            id: 0,
            target: target.to_string(),
            issue_type: issue,
            strategy: chosen,
            status,
            started_at_ms,
            duration: started.elapsed(),
            triggering_report_id: None,
            manual: false,
            message,
        }
    }

    async fn dispatch(&self, chosen: RepairStrategy, service: &str) -> RuntimeResult<()> {
        match chosen {
            RepairStrategy::Restart => self.runtime.restart(service).await,
            RepairStrategy::Rebuild => self.runtime.rebuild(service).await,
            RepairStrategy::Rollback => self.runtime.rollback(service).await,
            RepairStrategy::None => Ok(()),
        }
    }

    fn record(&self, action: &mut RepairAction) {
        match self.state.store_repair_action(action) {
            Ok(id) => action.id = id,
            Err(e) => {
                error!(target = %action.target, error = %e, "failed to record repair action")
            }
        }
    }
}

fn skipped(target: &str, issue: IssueType, chosen: RepairStrategy, reason: &str) -> RepairAction {
    RepairAction {
        id: 0,
        target: target.to_string(),
        issue_type: issue,
        strategy: chosen,
        status: RepairStatus::Skipped,
        started_at_ms: epoch_millis(),
        duration: std::time::Duration::ZERO,
        triggering_report_id: None,
        manual: false,
        message: Some(reason.to_string()),
    }
}
