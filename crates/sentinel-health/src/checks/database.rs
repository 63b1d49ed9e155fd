//! Database connectivity: connect and run `SELECT 1`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::Connection;
use sqlx::postgres::PgConnection;
use tokio::time::Instant;
use tracing::debug;

use sentinel_state::{CheckKind, CheckResult, CheckStatus, FailureKind, TargetObservation};

use crate::checker::{CheckContext, Checker};

pub struct DatabaseChecker {
    name: String,
    url: String,
    timeout: Duration,
}

impl DatabaseChecker {
    /// `name` doubles as the database's target identity.
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout,
        }
    }
}

/// Returns the server version number when the server reports one.
async fn ping(url: &str) -> Result<Option<u32>, sqlx::Error> {
    let mut conn = PgConnection::connect(url).await?;
    sqlx::query("SELECT 1").execute(&mut conn).await?;
    let version = conn.server_version_num();
    if let Err(e) = conn.close().await {
        debug!(error = %e, "database connection close failed");
    }
    Ok(version)
}

#[async_trait]
impl Checker for DatabaseChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Database
    }

    fn targets(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started = Instant::now();
        let budget = ctx.budget(self.timeout);
        let result = match tokio::time::timeout(budget, ping(&self.url)).await {
            Ok(Ok(version)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let mut result = CheckResult::pass(
                    &self.name,
                    self.kind(),
                    "database connected and responsive",
                )
                .with_target(TargetObservation::healthy(&self.name, Some(elapsed_ms)));
                if let Some(v) = version {
                    result = result.with_detail("server_version_num", v);
                }
                result
            }
            Ok(Err(e)) => CheckResult::fail(
                &self.name,
                self.kind(),
                format!("database probe failed: {e}"),
            )
            .with_target(TargetObservation::failing(
                &self.name,
                CheckStatus::Fail,
                FailureKind::ProbeError,
            )),
            Err(_) => CheckResult::fail(
                &self.name,
                self.kind(),
                format!("database did not answer within {budget:?}"),
            )
            .with_target(TargetObservation::failing(
                &self.name,
                CheckStatus::Fail,
                FailureKind::Timeout,
            )),
        };
        result.with_duration(started.elapsed())
    }
}
