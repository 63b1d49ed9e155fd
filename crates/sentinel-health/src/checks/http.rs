//! HTTP endpoint check against one target's health URL.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use sentinel_state::{
    CheckKind, CheckResult, CheckStatus, FailureKind, PolicyStore, TargetObservation,
};

use crate::checker::{CheckContext, Checker};
use crate::probe::{HttpOutcome, ProbeError, http_get};

pub struct HttpChecker {
    name: String,
    target: String,
    url: String,
    policies: PolicyStore,
    timeout: Duration,
}

impl HttpChecker {
    pub fn new(
        target: impl Into<String>,
        url: impl Into<String>,
        policies: PolicyStore,
        timeout: Duration,
    ) -> Self {
        let target = target.into();
        Self {
            name: format!("http_{target}"),
            target,
            url: url.into(),
            policies,
            timeout,
        }
    }
}

/// Grade a probe outcome against the target's response-time budget.
pub fn grade(
    target: &str,
    outcome: &Result<HttpOutcome, ProbeError>,
    max_response_time_ms: u64,
) -> (CheckStatus, TargetObservation, String) {
    match outcome {
        Ok(o) if o.is_success() && o.elapsed_ms() <= max_response_time_ms => (
            CheckStatus::Pass,
            TargetObservation::healthy(target, Some(o.elapsed_ms())),
            format!("HTTP {} in {}ms", o.status.as_u16(), o.elapsed_ms()),
        ),
        Ok(o) if o.is_success() => (
            CheckStatus::Warn,
            TargetObservation::failing(target, CheckStatus::Warn, FailureKind::Slow)
                .with_response_time(o.elapsed_ms()),
            format!(
                "HTTP {} in {}ms exceeds {}ms",
                o.status.as_u16(),
                o.elapsed_ms(),
                max_response_time_ms
            ),
        ),
        Ok(o) => (
            CheckStatus::Fail,
            TargetObservation::failing(target, CheckStatus::Fail, FailureKind::BadStatus)
                .with_response_time(o.elapsed_ms()),
            format!("HTTP {}", o.status.as_u16()),
        ),
        Err(e) => (
            CheckStatus::Fail,
            TargetObservation::failing(target, CheckStatus::Fail, e.failure_kind()),
            format!("request failed: {e}"),
        ),
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Http
    }

    fn targets(&self) -> Vec<String> {
        vec![self.target.clone()]
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started = Instant::now();
        let policy = match self.policies.get(&self.target) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(target = %self.target, error = %e, "policy lookup failed, using default");
                self.policies.defaults().get(&self.target)
            }
        };

        let outcome = http_get(&self.url, ctx.budget(self.timeout)).await;
        let (status, observation, message) =
            grade(&self.target, &outcome, policy.max_response_time_ms);

        let mut result = CheckResult::new(&self.name, self.kind(), status, message)
            .with_detail("url", self.url.as_str())
            .with_detail("max_response_time_ms", policy.max_response_time_ms);
        if let Ok(o) = &outcome {
            result = result
                .with_detail("status_code", o.status.as_u16())
                .with_detail("response_time_ms", o.elapsed_ms());
        }
        result
            .with_target(observation)
            .with_duration(started.elapsed())
    }
}
