//! Container runtime control surface.
//!
//! Sentinel never manages containers itself; it asks the runtime which
//! services are running and issues restart/rebuild/rollback commands.
//! `ComposeRuntime` drives any CLI through configurable argv templates
//! (defaults use `docker compose`).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use sentinel_core::RuntimeConfig;
use sentinel_core::config::TARGET_PLACEHOLDER;

/// Errors from runtime commands.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("empty command template")]
    EmptyCommand,

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Operations Sentinel needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Names of currently running services.
    async fn running_services(&self) -> RuntimeResult<Vec<String>>;

    async fn restart(&self, service: &str) -> RuntimeResult<()>;

    async fn rebuild(&self, service: &str) -> RuntimeResult<()>;

    /// Relaunch the last known-good image without building.
    async fn rollback(&self, service: &str) -> RuntimeResult<()>;
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `argv` to completion within `timeout`. A non-zero exit is an error.
/// The child is killed if the timeout elapses.
pub async fn run_command(argv: &[String], timeout: Duration) -> RuntimeResult<CommandOutput> {
    let output = capture_command(argv, timeout).await?;
    if !output.success() {
        return Err(RuntimeError::Exit {
            program: argv.first().cloned().unwrap_or_default(),
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

/// Like `run_command`, but any exit status is returned to the caller.
/// Tools such as vulnerability scanners exit non-zero with a usable report.
pub async fn capture_command(argv: &[String], timeout: Duration) -> RuntimeResult<CommandOutput> {
    let (program, args) = argv.split_first().ok_or(RuntimeError::EmptyCommand)?;
    debug!(%program, ?args, "running command");

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(RuntimeError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(RuntimeError::Timeout {
                program: program.clone(),
                timeout,
            });
        }
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        code: output.status.code(),
    })
}

/// Replace `placeholder` in every argument of a template.
pub fn render(template: &[String], placeholder: &str, value: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(placeholder, value))
        .collect()
}

/// `ContainerRuntime` backed by CLI command templates.
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    status: Vec<String>,
    restart: Vec<String>,
    rebuild: Vec<String>,
    rollback: Vec<String>,
    timeout: Duration,
}

impl ComposeRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            status: config.status_command(),
            restart: config.restart_command(),
            rebuild: config.rebuild_command(),
            rollback: config.rollback_command(),
            timeout: config.command_timeout(),
        }
    }

    async fn run_for(&self, action: &str, template: &[String], service: &str) -> RuntimeResult<()> {
        let argv = render(template, TARGET_PLACEHOLDER, service);
        info!(%service, %action, "issuing runtime command");
        match run_command(&argv, self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(%service, %action, error = %e, "runtime command failed");
                Err(e)
            }
        }
    }
}

impl Default for ComposeRuntime {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn running_services(&self) -> RuntimeResult<Vec<String>> {
        let output = run_command(&self.status, self.timeout).await?;
        Ok(parse_service_list(&output.stdout))
    }

    async fn restart(&self, service: &str) -> RuntimeResult<()> {
        self.run_for("restart", &self.restart, service).await
    }

    async fn rebuild(&self, service: &str) -> RuntimeResult<()> {
        self.run_for("rebuild", &self.rebuild, service).await
    }

    async fn rollback(&self, service: &str) -> RuntimeResult<()> {
        self.run_for("rollback", &self.rollback, service).await
    }
}

/// One service name per non-empty line.
fn parse_service_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
