//! sentinel-health — health probing for Sentinel.
//!
//! Provides the `Checker` contract, the seven checker kinds, the
//! orchestrator that runs them as one cycle, and the container runtime
//! control surface that both the checks and the repair engine drive.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::run_all
//!   ├── one tokio task per Checker, bounded by min(cycle deadline, check timeout)
//!   │   ├── ContainerChecker   → ContainerRuntime::running_services
//!   │   ├── HttpChecker        → probe::http_get + Policy.max_response_time_ms
//!   │   ├── DatabaseChecker    → sqlx PgConnection + SELECT 1
//!   │   ├── RouteChecker       → nginx config → gateway/upstream probes
//!   │   ├── PerformanceChecker → concurrent endpoint sampling
//!   │   ├── DependencyChecker  → probe each target once, walk the graph
//!   │   └── SecurityChecker    → scanner subprocess per image
//!   └── Report (overall status = worst result)
//! ```
//!
//! Checkers never return errors; probe failures become `fail` results and
//! the orchestrator turns overruns, cancellation and panics into results
//! of their own.

pub mod checker;
pub mod checks;
pub mod format;
pub mod orchestrator;
pub mod probe;
pub mod runtime;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use checker::{CheckContext, Checker};
pub use format::{format_human, format_json};
pub use orchestrator::Orchestrator;
pub use probe::{HttpOutcome, ProbeError, http_get};
pub use runtime::{ComposeRuntime, ContainerRuntime, RuntimeError, RuntimeResult};
