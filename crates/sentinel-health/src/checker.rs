//! The `Checker` contract shared by every probe kind.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use sentinel_state::{CheckKind, CheckResult};

/// A single health probe.
///
/// Implementations never return errors: anything that goes wrong while
/// probing becomes a `fail` result carrying the error text. A checker must
/// finish by `ctx.deadline()`; the orchestrator enforces this anyway.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Stable name used as the result name.
    fn name(&self) -> &str;

    fn kind(&self) -> CheckKind;

    /// Targets this checker is responsible for. A checker that overruns
    /// its bound is recorded as a timeout against each of them.
    fn targets(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult;
}

/// Per-run bounds handed to a checker.
#[derive(Debug, Clone)]
pub struct CheckContext {
    deadline: Instant,
    cancel: watch::Receiver<bool>,
}

impl CheckContext {
    pub fn new(deadline: Instant, cancel: watch::Receiver<bool>) -> Self {
        Self { deadline, cancel }
    }

    /// A context that is never cancelled, expiring after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (tx, rx) = watch::channel(false);
        // A closed channel keeps its last value, which is `false`.
        drop(tx);
        Self::new(Instant::now() + timeout, rx)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// `remaining()` capped at `limit`.
    pub fn budget(&self, limit: Duration) -> Duration {
        self.remaining().min(limit)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is signalled. Never resolves if the
    /// sender is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
