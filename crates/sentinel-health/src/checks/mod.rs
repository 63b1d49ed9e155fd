//! The seven checker kinds and the config-driven checker set.

pub mod container;
pub mod database;
pub mod dependency;
pub mod http;
pub mod performance;
pub mod route;
pub mod security;

use std::sync::Arc;

use sentinel_core::SentinelConfig;
use sentinel_state::PolicyStore;

use crate::checker::Checker;
use crate::runtime::ContainerRuntime;

pub use container::{ContainerChecker, ExpectedContainer};
pub use database::DatabaseChecker;
pub use dependency::DependencyChecker;
pub use http::HttpChecker;
pub use performance::PerformanceChecker;
pub use route::RouteChecker;
pub use security::{ScannedImage, SecurityChecker};

/// Build the checker set a configuration describes.
///
/// Container, HTTP and dependency checks come from `[[targets]]`; the
/// database, route and security checks are only added when their section
/// is present. Performance sampling always runs.
pub fn from_config(
    config: &SentinelConfig,
    runtime: Arc<dyn ContainerRuntime>,
    policies: PolicyStore,
) -> Vec<Arc<dyn Checker>> {
    let timeout = config.check_timeout();
    let mut checkers: Vec<Arc<dyn Checker>> = Vec::new();

    if !config.targets.is_empty() {
        let expected = config
            .targets
            .iter()
            .map(|t| ExpectedContainer {
                target: t.name.clone(),
                container: t.container_name().to_string(),
            })
            .collect();
        checkers.push(Arc::new(ContainerChecker::new(runtime, expected)));
    }

    for target in &config.targets {
        if let Some(url) = &target.health_url {
            checkers.push(Arc::new(HttpChecker::new(
                target.name.clone(),
                url.clone(),
                policies.clone(),
                timeout,
            )));
        }
    }

    if let Some(db) = &config.database {
        let name = db.name.clone().unwrap_or_else(|| "database".to_string());
        checkers.push(Arc::new(DatabaseChecker::new(name, db.url.clone(), timeout)));
    }

    if let Some(routes) = &config.routes {
        checkers.push(Arc::new(RouteChecker::new(
            routes.config_path.clone(),
            routes.gateway_url.clone(),
            timeout,
        )));
    }

    checkers.push(Arc::new(PerformanceChecker::new(
        config.performance_endpoints(),
        timeout,
    )));

    if !config.targets.is_empty() {
        checkers.push(Arc::new(DependencyChecker::new(
            config.dependency_graph(),
            config.health_urls(),
            timeout,
        )));
    }

    if let Some(security) = &config.security {
        let images = config
            .targets
            .iter()
            .filter_map(|t| {
                t.image.as_ref().map(|image| ScannedImage {
                    target: t.name.clone(),
                    image: image.clone(),
                })
            })
            .collect();
        checkers.push(Arc::new(SecurityChecker::new(
            images,
            security.scanner_command(),
            security.scan_timeout(),
        )));
    }

    checkers
}
