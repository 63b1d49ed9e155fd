//! Pure repair decisions: what is wrong with a target, and what to do.
//!
//! ```text
//! observation failure          → issue
//!   timeout, connection_refused → timeout
//!   not_running, bad_status     → crash
//!   critical_vulnerability      → security
//!   dependency_down             → dependency
//!   anything else               → none
//!
//! issue      → strategy
//!   timeout    → restart
//!   crash      → rebuild (rollback if the policy prefers rollback)
//!   security   → rebuild
//!   dependency → none
//!   none       → none
//! ```
//!
//! Only `fail` observations count, except `dependency_down`, which is
//! recorded as `warn`. With several issues, crash > security > timeout >
//! dependency.

use sentinel_state::{CheckStatus, FailureKind, IssueType, Policy, RepairStrategy, Report};

fn issue_for(status: CheckStatus, failure: FailureKind) -> IssueType {
    match (status, failure) {
        (CheckStatus::Pass, _) => IssueType::None,
        (_, FailureKind::DependencyDown) => IssueType::Dependency,
        (CheckStatus::Warn, _) => IssueType::None,
        (_, FailureKind::Timeout | FailureKind::ConnectionRefused) => IssueType::Timeout,
        (_, FailureKind::NotRunning | FailureKind::BadStatus) => IssueType::Crash,
        (_, FailureKind::CriticalVulnerability) => IssueType::Security,
        _ => IssueType::None,
    }
}

fn precedence(issue: IssueType) -> u8 {
    match issue {
        IssueType::Crash => 4,
        IssueType::Security => 3,
        IssueType::Timeout => 2,
        IssueType::Dependency => 1,
        IssueType::None => 0,
    }
}

/// The most severe issue observed for `target` in `report`.
pub fn classify(report: &Report, target: &str) -> IssueType {
    report
        .observations_for(target)
        .filter_map(|o| o.failure.map(|f| issue_for(o.status, f)))
        .max_by_key(|issue| precedence(*issue))
        .unwrap_or(IssueType::None)
}

/// Strategy for an issue under a target's policy. A policy preferring
/// `none` vetoes every repair.
pub fn strategy(issue: IssueType, policy: &Policy) -> RepairStrategy {
    if policy.repair_strategy == RepairStrategy::None {
        return RepairStrategy::None;
    }
    match issue {
        IssueType::Timeout => RepairStrategy::Restart,
        IssueType::Crash if policy.repair_strategy == RepairStrategy::Rollback => {
            RepairStrategy::Rollback
        }
        IssueType::Crash | IssueType::Security => RepairStrategy::Rebuild,
        IssueType::Dependency | IssueType::None => RepairStrategy::None,
    }
}
