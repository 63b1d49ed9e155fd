//! Test doubles for checkers, the container runtime and HTTP endpoints.
//!
//! Shared by this crate's unit tests and, through the `testing` feature,
//! by downstream crates' tests.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use sentinel_state::{CheckKind, CheckResult};

use crate::checker::{CheckContext, Checker};
use crate::runtime::{ContainerRuntime, RuntimeError, RuntimeResult};

/// Returns a fixed result.
pub struct StaticChecker {
    result: CheckResult,
}

impl StaticChecker {
    pub fn new(result: CheckResult) -> Self {
        Self { result }
    }
}

#[async_trait]
impl Checker for StaticChecker {
    fn name(&self) -> &str {
        &self.result.name
    }

    fn kind(&self) -> CheckKind {
        self.result.kind
    }

    async fn run(&self, _ctx: &CheckContext) -> CheckResult {
        self.result.clone()
    }
}

/// Never finishes on its own; ignores deadline and cancellation.
pub struct HangingChecker {
    name: String,
}

impl HangingChecker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Checker for HangingChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Http
    }

    async fn run(&self, _ctx: &CheckContext) -> CheckResult {
        std::future::pending::<CheckResult>().await
    }
}

/// Panics when run.
pub struct PanickingChecker {
    name: String,
}

impl PanickingChecker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Checker for PanickingChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Http
    }

    async fn run(&self, _ctx: &CheckContext) -> CheckResult {
        panic!("checker {} exploded", self.name);
    }
}

/// A runtime call recorded by `RecordingRuntime`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Restart(String),
    Rebuild(String),
    Rollback(String),
}

/// In-memory runtime that records every command.
#[derive(Clone, Default)]
pub struct RecordingRuntime {
    running: Arc<Mutex<BTreeSet<String>>>,
    failing: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<RuntimeCall>>>,
    delay: Duration,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_running(self, services: &[&str]) -> Self {
        if let Ok(mut running) = self.running.lock() {
            running.extend(services.iter().map(|s| s.to_string()));
        }
        self
    }

    /// Repairs of `service` fail.
    pub fn with_failing(self, service: &str) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(service.to_string());
        }
        self
    }

    /// Every repair command takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    async fn record(&self, call: RuntimeCall, service: &str) -> RuntimeResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        let fails = self
            .failing
            .lock()
            .map(|f| f.contains(service))
            .unwrap_or(false);
        if fails {
            return Err(RuntimeError::Exit {
                program: "fake".into(),
                code: Some(1),
                stderr: format!("{service} refused to come back"),
            });
        }
        if let Ok(mut running) = self.running.lock() {
            running.insert(service.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn running_services(&self) -> RuntimeResult<Vec<String>> {
        Ok(self
            .running
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn restart(&self, service: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::Restart(service.to_string()), service)
            .await
    }

    async fn rebuild(&self, service: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::Rebuild(service.to_string()), service)
            .await
    }

    async fn rollback(&self, service: &str) -> RuntimeResult<()> {
        self.record(RuntimeCall::Rollback(service.to_string()), service)
            .await
    }
}

/// Serve every request on a fresh local port with `status` after `delay`.
pub async fn spawn_http_stub(status: u16, delay: Duration) -> SocketAddr {
    spawn_http_router(move |_path| (status, delay)).await
}

/// Serve every request with the `(status, delay)` chosen from its path.
pub async fn spawn_http_router<F>(route: F) -> SocketAddr
where
    F: Fn(&str) -> (u16, Duration) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub address");
    let route = Arc::new(route);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let route = route.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();
                let (status, delay) = route(&path);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let response = format!(
                    "HTTP/1.1 {status} STUB\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}
