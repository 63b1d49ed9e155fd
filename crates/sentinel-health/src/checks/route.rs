//! Route validity: routes discovered from the reverse-proxy config are
//! requested through the gateway and, when the gateway rejects them,
//! directly against the upstream.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use sentinel_state::{CheckKind, CheckResult, CheckStatus, FailureKind, TargetObservation};

use crate::checker::{CheckContext, Checker};
use crate::probe::{HttpOutcome, ProbeError, http_get};

/// A `location` block proxied to an upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub path: String,
    /// `host[:port]` from the `proxy_pass` directive.
    pub upstream: String,
}

impl Route {
    /// Upstream host without the port, used as the target identity.
    pub fn target(&self) -> &str {
        self.upstream
            .split_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.upstream)
    }
}

/// Extract `location <path> {` ... `proxy_pass http://<upstream>` pairs.
pub fn parse_routes(config: &str) -> Result<Vec<Route>, regex::Error> {
    let location_re = Regex::new(r"location\s+(?:[=~^*]+\s+)?(\S+)\s*\{")?;
    let proxy_re = Regex::new(r"proxy_pass\s+http://([^/;\s]+)")?;

    let mut routes = Vec::new();
    let mut current: Option<String> = None;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some(caps) = location_re.captures(line) {
            current = Some(caps[1].to_string());
        }
        if let Some(caps) = proxy_re.captures(line)
            && let Some(path) = current.take()
        {
            routes.push(Route {
                path,
                upstream: caps[1].to_string(),
            });
        }
    }
    Ok(routes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Ok,
    /// Gateway rejects the route while the upstream serves it.
    Broken,
    /// Gateway and upstream both reject it; the service is at fault.
    UpstreamDown,
    /// The gateway itself did not answer.
    GatewayDown,
}

fn rejected(status: http::StatusCode) -> bool {
    matches!(status.as_u16(), 404 | 502)
}

/// Decide a route's state. `direct` is only consulted when the gateway
/// rejected the route.
pub fn route_state(
    gateway: &Result<HttpOutcome, ProbeError>,
    direct: Option<&Result<HttpOutcome, ProbeError>>,
) -> RouteState {
    match gateway {
        Err(_) => RouteState::GatewayDown,
        Ok(g) if !rejected(g.status) => RouteState::Ok,
        Ok(_) => match direct {
            Some(Ok(d)) if !rejected(d.status) => RouteState::Broken,
            _ => RouteState::UpstreamDown,
        },
    }
}

#[derive(Debug, Clone, Serialize)]
struct RouteReport {
    path: String,
    upstream: String,
    state: RouteState,
    gateway_status: Option<u16>,
}

pub struct RouteChecker {
    config_path: PathBuf,
    gateway_url: String,
    timeout: Duration,
}

impl RouteChecker {
    pub fn new(
        config_path: impl Into<PathBuf>,
        gateway_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

async fn check_route(route: Route, gateway_url: String, timeout: Duration) -> RouteReport {
    let gateway = http_get(&format!("{gateway_url}{}", route.path), timeout).await;
    let direct = match &gateway {
        Ok(g) if rejected(g.status) => {
            Some(http_get(&format!("http://{}{}", route.upstream, route.path), timeout).await)
        }
        _ => None,
    };
    let state = route_state(&gateway, direct.as_ref());
    debug!(path = %route.path, upstream = %route.upstream, ?state, "route checked");
    RouteReport {
        gateway_status: gateway.as_ref().ok().map(|g| g.status.as_u16()),
        path: route.path,
        upstream: route.upstream,
        state,
    }
}

#[async_trait]
impl Checker for RouteChecker {
    fn name(&self) -> &str {
        "routes"
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Route
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started = Instant::now();
        let routes = match tokio::fs::read_to_string(&self.config_path).await {
            Ok(content) => match parse_routes(&content) {
                Ok(routes) => routes,
                Err(e) => {
                    return CheckResult::fail(
                        self.name(),
                        self.kind(),
                        format!("route pattern error: {e}"),
                    )
                    .with_duration(started.elapsed());
                }
            },
            Err(e) => {
                return CheckResult::fail(
                    self.name(),
                    self.kind(),
                    format!("failed to read {}: {e}", self.config_path.display()),
                )
                .with_duration(started.elapsed());
            }
        };

        if routes.is_empty() {
            let message = "no routes discovered in proxy config";
            return CheckResult::warn(self.name(), self.kind(), message)
                .with_detail("routes_discovered", 0)
                .with_duration(started.elapsed());
        }

        let budget = ctx.budget(self.timeout);
        let mut set = JoinSet::new();
        for (index, route) in routes.iter().cloned().enumerate() {
            let gateway_url = self.gateway_url.clone();
            set.spawn(async move { (index, check_route(route, gateway_url, budget).await) });
        }
        let mut reports: Vec<Option<RouteReport>> = vec![None; routes.len()];
        while let Some(joined) = set.join_next().await {
            if let Ok((index, report)) = joined {
                reports[index] = Some(report);
            }
        }
        let reports: Vec<RouteReport> = reports.into_iter().flatten().collect();

        let mut observations = Vec::new();
        let mut broken = Vec::new();
        let mut degraded = 0usize;
        for (route, report) in routes.iter().zip(&reports) {
            let target = route.target();
            let observation = match report.state {
                RouteState::Ok => TargetObservation::healthy(target, None),
                RouteState::Broken | RouteState::GatewayDown => {
                    broken.push(report.path.clone());
                    TargetObservation::failing(target, CheckStatus::Fail, FailureKind::RouteBroken)
                }
                RouteState::UpstreamDown => {
                    degraded += 1;
                    TargetObservation::failing(target, CheckStatus::Warn, FailureKind::BadStatus)
                }
            };
            observations.push(observation);
        }

        let valid = reports.iter().filter(|r| r.state == RouteState::Ok).count();
        let result = if !broken.is_empty() {
            CheckResult::fail(
                self.name(),
                self.kind(),
                format!("{}/{} routes broken: {}", broken.len(), routes.len(), broken.join(", ")),
            )
        } else if degraded > 0 {
            CheckResult::warn(
                self.name(),
                self.kind(),
                format!("{degraded}/{} routes have an unavailable upstream", routes.len()),
            )
        } else {
            CheckResult::pass(
                self.name(),
                self.kind(),
                format!("all {} gateway routes responding", routes.len()),
            )
        };
        result
            .with_detail("routes_discovered", routes.len())
            .with_detail("valid_routes", valid)
            .with_detail(
                "route_details",
                serde_json::to_value(&reports).unwrap_or_default(),
            )
            .with_targets(observations)
            .with_duration(started.elapsed())
    }
}
