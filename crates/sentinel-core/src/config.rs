//! sentinel.toml configuration parser.
//!
//! Every section is optional; accessors fall back to the defaults the
//! daemon runs with when nothing is configured.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::parse_duration;

/// Placeholder substituted with the service name in runtime command templates.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Placeholder substituted with the image name in the scanner command template.
pub const IMAGE_PLACEHOLDER: &str = "{image}";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    pub scheduler: Option<SchedulerConfig>,
    pub storage: Option<StorageConfig>,
    pub runtime: Option<RuntimeConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    pub database: Option<DatabaseConfig>,
    pub routes: Option<RoutesConfig>,
    pub performance: Option<PerformanceConfig>,
    pub security: Option<SecurityConfig>,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period between scheduled cycles (e.g. "5m").
    pub interval: Option<String>,
    /// Global deadline for one cycle.
    pub cycle_timeout: Option<String>,
    /// Upper bound for a single checker inside a cycle.
    pub check_timeout: Option<String>,
    /// History retention window (e.g. "30d").
    pub retention: Option<String>,
    /// How often the retention sweep runs.
    pub cleanup_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
}

/// Command templates for the container runtime. `{target}` is replaced
/// with the container/service name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub status: Option<Vec<String>>,
    pub restart: Option<Vec<String>>,
    pub rebuild: Option<Vec<String>>,
    pub rollback: Option<Vec<String>>,
    /// Timeout for a single runtime command (e.g. "5m").
    pub command_timeout: Option<String>,
}

/// A monitored service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    pub name: String,
    /// Health endpoint probed by the HTTP and dependency checkers.
    pub health_url: Option<String>,
    /// Container/service name in the runtime. Defaults to `name`.
    pub container: Option<String>,
    /// Image scanned by the security checker.
    pub image: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Check name and target identity of the database.
    pub name: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// Path to the reverse-proxy (nginx) configuration.
    pub config_path: PathBuf,
    /// Base URL of the gateway, e.g. "http://localhost:3000".
    pub gateway_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Scanner command template; `{image}` is replaced per image.
    pub command: Option<Vec<String>>,
    /// Timeout per scanned image (e.g. "60s").
    pub timeout: Option<String>,
}

/// Operator-supplied default policy for a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    pub target: String,
    pub max_response_time_ms: Option<u64>,
    pub auto_repair_enabled: Option<bool>,
    /// One of "restart", "rebuild", "rollback", "none".
    pub repair_strategy: Option<String>,
}

impl SentinelConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SentinelConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations that reference undeclared targets or carry
    /// unparseable durations. Every scheduler duration except `retention`
    /// must be non-zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                anyhow::bail!("target with empty name");
            }
            if !seen.insert(target.name.as_str()) {
                anyhow::bail!("duplicate target: {}", target.name);
            }
        }
        for target in &self.targets {
            for dep in &target.depends_on {
                if !seen.contains(dep.as_str()) {
                    anyhow::bail!("target {} depends on undeclared target {dep}", target.name);
                }
            }
        }
        if let Some(sched) = &self.scheduler {
            for (field, value, nonzero) in [
                ("interval", &sched.interval, true),
                ("cycle_timeout", &sched.cycle_timeout, true),
                ("check_timeout", &sched.check_timeout, true),
                ("retention", &sched.retention, false),
                ("cleanup_interval", &sched.cleanup_interval, true),
            ] {
                let Some(v) = value else { continue };
                match parse_duration(v) {
                    None => anyhow::bail!("scheduler.{field}: invalid duration {v:?}"),
                    Some(d) if nonzero && d.is_zero() => {
                        anyhow::bail!("scheduler.{field}: must be greater than zero")
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        self.scheduler_duration(|s| s.interval.as_deref(), Duration::from_secs(300))
    }

    pub fn cycle_timeout(&self) -> Duration {
        self.scheduler_duration(|s| s.cycle_timeout.as_deref(), Duration::from_secs(120))
    }

    pub fn check_timeout(&self) -> Duration {
        self.scheduler_duration(|s| s.check_timeout.as_deref(), Duration::from_secs(10))
    }

    pub fn retention(&self) -> Duration {
        self.scheduler_duration(|s| s.retention.as_deref(), Duration::from_secs(30 * 86_400))
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.scheduler_duration(|s| s.cleanup_interval.as_deref(), Duration::from_secs(3600))
    }

    fn scheduler_duration(
        &self,
        field: impl Fn(&SchedulerConfig) -> Option<&str>,
        default: Duration,
    ) -> Duration {
        self.scheduler
            .as_ref()
            .and_then(field)
            .and_then(parse_duration)
            .unwrap_or(default)
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from("/var/lib/sentinel/sentinel.redb"))
    }

    /// Static dependency graph: target → dependencies.
    pub fn dependency_graph(&self) -> BTreeMap<String, Vec<String>> {
        self.targets
            .iter()
            .map(|t| (t.name.clone(), t.depends_on.clone()))
            .collect()
    }

    /// Health URLs of every target that declares one.
    pub fn health_urls(&self) -> BTreeMap<String, String> {
        self.targets
            .iter()
            .filter_map(|t| t.health_url.clone().map(|u| (t.name.clone(), u)))
            .collect()
    }

    /// Endpoints sampled by the performance checker. Falls back to every
    /// target health URL when no explicit list is configured.
    pub fn performance_endpoints(&self) -> Vec<EndpointConfig> {
        match &self.performance {
            Some(p) if !p.endpoints.is_empty() => p.endpoints.clone(),
            _ => self
                .health_urls()
                .into_iter()
                .map(|(name, url)| EndpointConfig { name, url })
                .collect(),
        }
    }

    /// Scaffold a minimal sentinel.toml for a set of services.
    pub fn scaffold(services: &[(&str, u16)]) -> Self {
        SentinelConfig {
            scheduler: Some(SchedulerConfig {
                interval: Some("5m".to_string()),
                cycle_timeout: Some("2m".to_string()),
                check_timeout: Some("10s".to_string()),
                retention: Some("30d".to_string()),
                cleanup_interval: Some("1h".to_string()),
            }),
            storage: None,
            runtime: None,
            targets: services
                .iter()
                .map(|(name, port)| TargetConfig {
                    name: name.to_string(),
                    health_url: Some(format!("http://localhost:{port}/health")),
                    container: None,
                    image: None,
                    depends_on: Vec::new(),
                })
                .collect(),
            database: None,
            routes: None,
            performance: None,
            security: None,
            policies: Vec::new(),
        }
    }
}

impl TargetConfig {
    /// Name of the container backing this target.
    pub fn container_name(&self) -> &str {
        self.container.as_deref().unwrap_or(&self.name)
    }
}

impl RuntimeConfig {
    pub fn status_command(&self) -> Vec<String> {
        self.status.clone().unwrap_or_else(|| {
            strings(&["docker", "compose", "ps", "--services", "--filter", "status=running"])
        })
    }

    pub fn restart_command(&self) -> Vec<String> {
        self.restart
            .clone()
            .unwrap_or_else(|| strings(&["docker", "compose", "restart", TARGET_PLACEHOLDER]))
    }

    pub fn rebuild_command(&self) -> Vec<String> {
        self.rebuild.clone().unwrap_or_else(|| {
            strings(&[
                "docker",
                "compose",
                "up",
                "-d",
                "--build",
                "--force-recreate",
                TARGET_PLACEHOLDER,
            ])
        })
    }

    /// Relaunches the previously pulled image without building.
    pub fn rollback_command(&self) -> Vec<String> {
        self.rollback.clone().unwrap_or_else(|| {
            strings(&[
                "docker",
                "compose",
                "up",
                "-d",
                "--no-build",
                "--force-recreate",
                TARGET_PLACEHOLDER,
            ])
        })
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(300))
    }
}

impl SecurityConfig {
    pub fn scanner_command(&self) -> Vec<String> {
        self.command.clone().unwrap_or_else(|| {
            strings(&["trivy", "image", "--format", "json", "--quiet", IMAGE_PLACEHOLDER])
        })
    }

    pub fn scan_timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(60))
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
