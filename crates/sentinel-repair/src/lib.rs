//! sentinel-repair — turns unhealthy reports into repair actions.
//!
//! For every target a report marks as affected, the engine classifies the
//! issue, picks a strategy under the target's policy and, when the policy
//! allows it, drives the container runtime. Every decision is recorded as a
//! `RepairAction`, including skips.
//!
//! ```text
//! StoredReport
//!   └── affected_targets()        (one task per target)
//!         ├── classify()          → IssueType
//!         ├── strategy(policy)    → RepairStrategy
//!         ├── none / disabled / aborted → skipped
//!         └── ContainerRuntime::{restart,rebuild,rollback}
//!               → succeeded | failed   (never retried)
//! ```

pub mod decision;
pub mod engine;
pub mod error;

pub use decision::{classify, strategy};
pub use engine::RepairEngine;
pub use error::{RepairError, RepairResult};
