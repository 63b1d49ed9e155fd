//! Container status: every declared container must be running.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use sentinel_state::{CheckKind, CheckResult, CheckStatus, FailureKind, TargetObservation};

use crate::checker::{CheckContext, Checker};
use crate::runtime::ContainerRuntime;

/// A target and the runtime service backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedContainer {
    pub target: String,
    pub container: String,
}

pub struct ContainerChecker {
    runtime: Arc<dyn ContainerRuntime>,
    expected: Vec<ExpectedContainer>,
}

impl ContainerChecker {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, expected: Vec<ExpectedContainer>) -> Self {
        Self { runtime, expected }
    }
}

/// Expected containers absent from `running`.
pub fn missing_containers<'a>(
    expected: &'a [ExpectedContainer],
    running: &[String],
) -> Vec<&'a ExpectedContainer> {
    expected
        .iter()
        .filter(|e| !running.iter().any(|r| r == &e.container))
        .collect()
}

#[async_trait]
impl Checker for ContainerChecker {
    fn name(&self) -> &str {
        "containers"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Container
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started = Instant::now();
        let running =
            match tokio::time::timeout_at(ctx.deadline(), self.runtime.running_services()).await {
                Ok(Ok(running)) => running,
                Ok(Err(e)) => {
                    return CheckResult::fail(
                        self.name(),
                        self.kind(),
                        format!("failed to query container runtime: {e}"),
                    )
                    .with_duration(started.elapsed());
                }
                Err(_) => {
                    return CheckResult::fail(
                        self.name(),
                        self.kind(),
                        "container runtime query timed out",
                    )
                    .with_duration(started.elapsed());
                }
            };

        let missing = missing_containers(&self.expected, &running);
        debug!(
            expected = self.expected.len(),
            running = running.len(),
            missing = missing.len(),
            "container status"
        );

        let observations: Vec<TargetObservation> = self
            .expected
            .iter()
            .map(|e| {
                if missing.contains(&e) {
                    TargetObservation::failing(
                        &e.target,
                        CheckStatus::Fail,
                        FailureKind::NotRunning,
                    )
                } else {
                    TargetObservation::healthy(&e.target, None)
                }
            })
            .collect();
        let missing_names: Vec<String> = missing.iter().map(|e| e.container.clone()).collect();

        let result = if missing.is_empty() {
            CheckResult::pass(
                self.name(),
                self.kind(),
                format!("all {} services running", self.expected.len()),
            )
        } else {
            CheckResult::fail(
                self.name(),
                self.kind(),
                format!(
                    "{}/{} services running, missing: {}",
                    self.expected.len() - missing.len(),
                    self.expected.len(),
                    missing_names.join(", ")
                ),
            )
        };
        result
            .with_detail("expected", self.expected.len())
            .with_detail("running", running.len())
            .with_detail("missing", missing_names)
            .with_targets(observations)
            .with_duration(started.elapsed())
    }
}
