//! Scheduler — the periodic health loop.
//!
//! One cycle runs immediately on `start()` and then every `interval`.
//! Scheduled cycles run in their own task so the loop keeps ticking; a
//! tick that finds a cycle in flight is dropped, while `trigger_cycle()`
//! waits its turn. `stop()` cancels the in-flight
//! cycle, waits for it to store its report, and no cycle starts after it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use sentinel_core::SentinelConfig;
use sentinel_health::{Checker, Orchestrator};
use sentinel_repair::RepairEngine;
use sentinel_state::{CheckStatus, RepairAction, StateStore, StoredReport, TriggerSource};

use crate::error::{SchedulerError, SchedulerResult};

/// Timing knobs for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub cycle_timeout: Duration,
    pub check_timeout: Duration,
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            interval: config.interval(),
            cycle_timeout: config.cycle_timeout(),
            check_timeout: config.check_timeout(),
            retention: config.retention(),
            cleanup_interval: config.cleanup_interval(),
        }
    }

    /// `tokio::time::interval` panics on a zero period.
    fn check_periods(&self) -> SchedulerResult<()> {
        if self.interval.is_zero() {
            return Err(SchedulerError::InvalidSettings("interval must be non-zero".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(SchedulerError::InvalidSettings(
                "cleanup_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&SentinelConfig::default())
    }
}

/// What one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// The cycle's report. `id` is 0 when the report could not be stored.
    pub report: StoredReport,
    pub repairs: Vec<RepairAction>,
}

struct Inner {
    settings: SchedulerSettings,
    orchestrator: Orchestrator,
    checkers: Vec<Arc<dyn Checker>>,
    repair: RepairEngine,
    state: StateStore,
    /// Held for the whole of a cycle.
    cycle_lock: Arc<Mutex<()>>,
    shutdown: watch::Sender<bool>,
    latest: RwLock<Option<StoredReport>>,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        checkers: Vec<Arc<dyn Checker>>,
        repair: RepairEngine,
        state: StateStore,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                settings,
                orchestrator: Orchestrator::new(settings.cycle_timeout, settings.check_timeout),
                checkers,
                repair,
                state,
                cycle_lock: Arc::new(Mutex::new(())),
                shutdown,
                latest: RwLock::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the background loop. The first cycle runs immediately.
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut task = self.task.lock().await;
        if *self.inner.shutdown.borrow() {
            return Err(SchedulerError::Stopped);
        }
        if task.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.inner.settings.check_periods()?;

        info!(
            interval_secs = self.inner.settings.interval.as_secs(),
            checkers = self.inner.checkers.len(),
            "scheduler started"
        );
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { inner.run().await }));
        Ok(())
    }

    /// Cancel the in-flight cycle, wait for it to finish, and stop the loop.
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop aborted");
            }
        }
        // A scheduled or manual cycle may still hold the lock.
        let _guard = self.inner.cycle_lock.lock().await;
        info!("scheduler stopped");
    }

    /// Run an ad-hoc `manual` cycle, waiting for any running cycle first.
    pub async fn trigger_cycle(&self) -> SchedulerResult<CycleOutcome> {
        let _guard = self.inner.cycle_lock.lock().await;
        self.inner.cycle(TriggerSource::Manual).await
    }

    /// Report of the most recent cycle run by this scheduler.
    pub fn latest_cached(&self) -> Option<StoredReport> {
        self.inner.latest.read().ok().and_then(|r| r.clone())
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        let mut cycles = tokio::time::interval(self.settings.interval);
        cycles.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweeps = tokio::time::interval(self.settings.cleanup_interval);
        sweeps.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = cycles.tick() => {
                    let Ok(guard) = Arc::clone(&self.cycle_lock).try_lock_owned() else {
                        debug!("cycle still running, skipping tick");
                        continue;
                    };
                    self.spawn_cycle(guard);
                }
                _ = sweeps.tick() => self.sweep(),
            }
        }
        info!("scheduler loop exiting");
    }

    /// Run a scheduled cycle in the background. `stop()` waits on the lock.
    fn spawn_cycle(self: &Arc<Self>, guard: OwnedMutexGuard<()>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = inner.cycle(TriggerSource::Scheduled).await {
                debug!(error = %e, "scheduled cycle not run");
            }
        });
    }

    /// One cycle. The caller holds `cycle_lock`.
    async fn cycle(&self, trigger: TriggerSource) -> SchedulerResult<CycleOutcome> {
        let cancel = self.shutdown.subscribe();
        if *cancel.borrow() {
            return Err(SchedulerError::Stopped);
        }

        let report = self
            .orchestrator
            .run_all(&self.checkers, trigger, cancel.clone())
            .await;

        let id = match self.state.store_report(&report) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to store report");
                0
            }
        };
        let stored = StoredReport { id, report };
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(stored.clone());
        }

        let repairs = if stored.report.overall_status == CheckStatus::Pass {
            Vec::new()
        } else {
            self.repair.handle_report(&stored, cancel).await
        };
        if !repairs.is_empty() {
            info!(report_id = id, actions = repairs.len(), "repairs evaluated");
        }

        Ok(CycleOutcome {
            report: stored,
            repairs,
        })
    }

    fn sweep(&self) {
        match self.state.cleanup(self.settings.retention) {
            Ok(stats) if stats.reports + stats.repairs > 0 => {
                info!(
                    reports = stats.reports,
                    details = stats.details,
                    repairs = stats.repairs,
                    "retention sweep removed old history"
                );
            }
            Ok(_) => debug!("retention sweep found nothing to remove"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }
    }
}
