//! Dependency graph: a target whose own probe passes but whose
//! dependencies are down is degraded, never failed.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use sentinel_state::{CheckKind, CheckResult, CheckStatus, FailureKind, TargetObservation};

use crate::checker::{CheckContext, Checker};
use crate::probe::http_get;

/// Outcome of probing one target's health URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Up { response_time_ms: u64 },
    Down(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDependency {
    pub service: String,
    pub state: ServiceState,
    pub dependencies: Vec<String>,
    pub healthy_deps: usize,
    pub total_deps: usize,
    #[serde(skip)]
    pub observation: TargetObservation,
}

/// Evaluate every target in `graph` against the probe results.
///
/// Targets without a probe result (no health URL) count as up.
pub fn evaluate(
    graph: &BTreeMap<String, Vec<String>>,
    probes: &BTreeMap<String, Probe>,
) -> Vec<ServiceDependency> {
    let is_up = |name: &str| !matches!(probes.get(name), Some(Probe::Down(_)));

    graph
        .iter()
        .map(|(service, deps)| {
            let healthy_deps = deps.iter().filter(|d| is_up(d.as_str())).count();
            let (state, observation) = match probes.get(service) {
                Some(Probe::Down(kind)) => (
                    ServiceState::Unhealthy,
                    TargetObservation::failing(service, CheckStatus::Fail, *kind),
                ),
                up if healthy_deps < deps.len() => {
                    let mut obs = TargetObservation::failing(
                        service,
                        CheckStatus::Warn,
                        FailureKind::DependencyDown,
                    );
                    if let Some(Probe::Up { response_time_ms }) = up {
                        obs = obs.with_response_time(*response_time_ms);
                    }
                    (ServiceState::Degraded, obs)
                }
                up => {
                    let rt = match up {
                        Some(Probe::Up { response_time_ms }) => Some(*response_time_ms),
                        _ => None,
                    };
                    (ServiceState::Healthy, TargetObservation::healthy(service, rt))
                }
            };
            ServiceDependency {
                service: service.clone(),
                state,
                dependencies: deps.clone(),
                healthy_deps,
                total_deps: deps.len(),
                observation,
            }
        })
        .collect()
}

/// Fail if any target is down, warn if any is degraded.
pub fn overall(services: &[ServiceDependency]) -> CheckStatus {
    if services.iter().any(|s| s.state == ServiceState::Unhealthy) {
        CheckStatus::Fail
    } else if services.iter().any(|s| s.state == ServiceState::Degraded) {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    }
}

pub struct DependencyChecker {
    graph: BTreeMap<String, Vec<String>>,
    health_urls: BTreeMap<String, String>,
    timeout: Duration,
}

impl DependencyChecker {
    pub fn new(
        graph: BTreeMap<String, Vec<String>>,
        health_urls: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            graph,
            health_urls,
            timeout,
        }
    }
}

#[async_trait]
impl Checker for DependencyChecker {
    fn name(&self) -> &str {
        "dependencies"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Dependency
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started = Instant::now();
        let budget = ctx.budget(self.timeout);

        // Each target is probed once, however many dependents it has.
        let mut set = JoinSet::new();
        for (name, url) in &self.health_urls {
            let (name, url) = (name.clone(), url.clone());
            set.spawn(async move {
                let probe = match http_get(&url, budget).await {
                    Ok(o) if o.is_success() => Probe::Up {
                        response_time_ms: o.elapsed_ms(),
                    },
                    Ok(_) => Probe::Down(FailureKind::BadStatus),
                    Err(e) => Probe::Down(e.failure_kind()),
                };
                (name, probe)
            });
        }
        let mut probes = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            if let Ok((name, probe)) = joined {
                probes.insert(name, probe);
            }
        }

        let services = evaluate(&self.graph, &probes);
        let status = overall(&services);
        let unhealthy: Vec<&str> = services
            .iter()
            .filter(|s| s.state == ServiceState::Unhealthy)
            .map(|s| s.service.as_str())
            .collect();
        let degraded: Vec<String> = services
            .iter()
            .filter(|s| s.state == ServiceState::Degraded)
            .map(|s| format!("{} ({}/{} deps up)", s.service, s.healthy_deps, s.total_deps))
            .collect();

        let message = match status {
            CheckStatus::Pass => {
                format!("all {} services and dependencies healthy", services.len())
            }
            CheckStatus::Warn => format!(
                "{} services have unhealthy dependencies: {}",
                degraded.len(),
                degraded.join(", ")
            ),
            CheckStatus::Fail => format!(
                "{}/{} services unhealthy: {}",
                unhealthy.len(),
                services.len(),
                unhealthy.join(", ")
            ),
        };

        let observations = services.iter().map(|s| s.observation.clone()).collect();
        CheckResult::new(self.name(), self.kind(), status, message)
            .with_detail(
                "dependency_status",
                serde_json::to_value(&services).unwrap_or_default(),
            )
            .with_detail("unhealthy_chains", degraded)
            .with_targets(observations)
            .with_duration(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(s, deps)| (s.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    fn probes(entries: &[(&str, Probe)]) -> BTreeMap<String, Probe> {
        entries.iter().map(|(n, p)| (n.to_string(), *p)).collect()
    }

    const UP: Probe = Probe::Up {
        response_time_ms: 10,
    };

    #[test]
    fn all_up_passes() {
        let g = graph(&[("portal", &[]), ("review", &["portal"])]);
        let services = evaluate(&g, &probes(&[("portal", UP), ("review", UP)]));
        assert_eq!(overall(&services), CheckStatus::Pass);
    }

    #[test]
    fn dependency_down_degrades_dependent_only() {
        let g = graph(&[("portal", &[]), ("review", &["portal"])]);
        let services = evaluate(
            &g,
            &probes(&[("portal", Probe::Down(FailureKind::Timeout)), ("review", UP)]),
        );

        let review = services.iter().find(|s| s.service == "review").unwrap();
        assert_eq!(review.state, ServiceState::Degraded);
        assert_eq!(review.observation.status, CheckStatus::Warn);
        assert_eq!(review.observation.failure, Some(FailureKind::DependencyDown));

        let portal = services.iter().find(|s| s.service == "portal").unwrap();
        assert_eq!(portal.observation.failure, Some(FailureKind::Timeout));
        assert_eq!(overall(&services), CheckStatus::Fail);
    }

    #[test]
    fn degraded_without_down_targets_warns() {
        // "db" is probed but declares no dependencies of its own.
        let g = graph(&[("review", &["db"])]);
        let services = evaluate(
            &g,
            &probes(&[("db", Probe::Down(FailureKind::ConnectionRefused)), ("review", UP)]),
        );
        assert_eq!(overall(&services), CheckStatus::Warn);
    }

    #[test]
    fn target_down_is_failed_not_degraded() {
        let g = graph(&[("portal", &[]), ("review", &["portal"])]);
        let services = evaluate(
            &g,
            &probes(&[
                ("portal", Probe::Down(FailureKind::Timeout)),
                ("review", Probe::Down(FailureKind::BadStatus)),
            ]),
        );
        let review = services.iter().find(|s| s.service == "review").unwrap();
        assert_eq!(review.state, ServiceState::Unhealthy);
        assert_eq!(review.observation.failure, Some(FailureKind::BadStatus));
    }

    #[test]
    fn unprobed_targets_count_as_up() {
        let g = graph(&[("review", &["portal"])]);
        let services = evaluate(&g, &probes(&[]));
        assert_eq!(services[0].state, ServiceState::Healthy);
        assert_eq!(services[0].healthy_deps, 1);
    }
}
