//! Performance sampling across configured endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use sentinel_core::EndpointConfig;
use sentinel_state::{CheckKind, CheckResult, CheckStatus, FailureKind, TargetObservation};

use crate::checker::{CheckContext, Checker};
use crate::probe::http_get;

const FAST_THRESHOLD_MS: u64 = 100;
const SLOW_THRESHOLD_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    Fast,
    Normal,
    Slow,
    Unreachable,
}

pub fn classify_speed(response_time_ms: u64) -> Speed {
    if response_time_ms < FAST_THRESHOLD_MS {
        Speed::Fast
    } else if response_time_ms > SLOW_THRESHOLD_MS {
        Speed::Slow
    } else {
        Speed::Normal
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointMetric {
    pub endpoint: String,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub speed: Speed,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl EndpointMetric {
    fn observation(&self) -> TargetObservation {
        match (self.speed, self.response_time_ms) {
            (Speed::Unreachable, _) => TargetObservation::failing(
                &self.endpoint,
                CheckStatus::Warn,
                self.failure.unwrap_or(FailureKind::ProbeError),
            ),
            (Speed::Slow, Some(ms)) => {
                TargetObservation::failing(&self.endpoint, CheckStatus::Warn, FailureKind::Slow)
                    .with_response_time(ms)
            }
            (_, ms) => TargetObservation::healthy(&self.endpoint, ms),
        }
    }
}

/// Mean response time of the reachable endpoints.
pub fn average_ms(metrics: &[EndpointMetric]) -> Option<u64> {
    let times: Vec<u64> = metrics.iter().filter_map(|m| m.response_time_ms).collect();
    if times.is_empty() {
        None
    } else {
        Some(times.iter().sum::<u64>() / times.len() as u64)
    }
}

pub struct PerformanceChecker {
    endpoints: Vec<EndpointConfig>,
    timeout: Duration,
}

impl PerformanceChecker {
    pub fn new(endpoints: Vec<EndpointConfig>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }
}

async fn measure(endpoint: EndpointConfig, timeout: Duration) -> EndpointMetric {
    match http_get(&endpoint.url, timeout).await {
        Ok(outcome) => EndpointMetric {
            endpoint: endpoint.name,
            response_time_ms: Some(outcome.elapsed_ms()),
            status_code: Some(outcome.status.as_u16()),
            speed: classify_speed(outcome.elapsed_ms()),
            failure: None,
        },
        Err(e) => EndpointMetric {
            endpoint: endpoint.name,
            response_time_ms: None,
            status_code: None,
            speed: Speed::Unreachable,
            failure: Some(e.failure_kind()),
        },
    }
}

#[async_trait]
impl Checker for PerformanceChecker {
    fn name(&self) -> &str {
        "performance"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Performance
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started = Instant::now();
        let budget = ctx.budget(self.timeout);

        let mut set = JoinSet::new();
        for (index, endpoint) in self.endpoints.iter().cloned().enumerate() {
            set.spawn(async move { (index, measure(endpoint, budget).await) });
        }
        let mut slots: Vec<Option<EndpointMetric>> = vec![None; self.endpoints.len()];
        while let Some(joined) = set.join_next().await {
            if let Ok((index, metric)) = joined {
                slots[index] = Some(metric);
            }
        }
        let metrics: Vec<EndpointMetric> = slots.into_iter().flatten().collect();

        let slow: Vec<&str> = metrics
            .iter()
            .filter(|m| m.speed == Speed::Slow)
            .map(|m| m.endpoint.as_str())
            .collect();
        let unreachable: Vec<&str> = metrics
            .iter()
            .filter(|m| m.speed == Speed::Unreachable)
            .map(|m| m.endpoint.as_str())
            .collect();
        let average = average_ms(&metrics);
        let avg_text = average.map(|a| format!("{a}ms")).unwrap_or_else(|| "n/a".into());

        let result = if slow.is_empty() && unreachable.is_empty() {
            CheckResult::pass(
                self.name(),
                self.kind(),
                format!("good performance: avg {avg_text} across {} endpoints", metrics.len()),
            )
        } else {
            CheckResult::warn(
                self.name(),
                self.kind(),
                format!(
                    "{} slow, {} unreachable of {} endpoints (avg {avg_text})",
                    slow.len(),
                    unreachable.len(),
                    metrics.len()
                ),
            )
        };
        let observations = metrics.iter().map(EndpointMetric::observation).collect();
        result
            .with_detail("metrics", serde_json::to_value(&metrics).unwrap_or_default())
            .with_detail("average_response_time_ms", average)
            .with_detail("slow_endpoints", slow)
            .with_detail("unreachable_endpoints", unreachable)
            .with_targets(observations)
            .with_duration(started.elapsed())
    }
}
