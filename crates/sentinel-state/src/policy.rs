//! Policy store — live per-target policies over an explicit default table.
//!
//! Lookups read the stored row first, then the default table, then the
//! table's fallback policy, so every target always resolves to exactly
//! one policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use sentinel_core::{PolicyConfig, epoch_millis};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::types::{Policy, RepairStrategy};

/// Default policies keyed by target, plus the policy used for targets
/// absent from the table.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDefaults {
    policies: BTreeMap<String, Policy>,
    fallback: Policy,
}

impl PolicyDefaults {
    /// Empty table with the given fallback. The fallback's `target` field
    /// is replaced with the requested target on lookup.
    pub fn new(fallback: Policy) -> Self {
        Self {
            policies: BTreeMap::new(),
            fallback,
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.insert(policy.target.clone(), policy);
        self
    }

    /// The platform's stock table.
    pub fn builtin() -> Self {
        Self::new(Policy::new("*", 1000, false, RepairStrategy::Restart))
            .with_policy(Policy::new("portal", 500, true, RepairStrategy::Restart))
            .with_policy(Policy::new("review", 1000, true, RepairStrategy::Restart))
            .with_policy(Policy::new("logs", 500, false, RepairStrategy::None))
            .with_policy(Policy::new("analytics", 2000, true, RepairStrategy::Restart))
    }

    /// Builtin table overlaid with `[[policies]]` entries from sentinel.toml.
    /// Unset fields inherit from the builtin entry for the same target, or
    /// from the fallback.
    pub fn from_config(entries: &[PolicyConfig]) -> StateResult<Self> {
        let mut defaults = Self::builtin();
        for entry in entries {
            let base = defaults.get(&entry.target);
            let repair_strategy = match &entry.repair_strategy {
                Some(s) => s.parse()?,
                None => base.repair_strategy,
            };
            let policy = Policy::new(
                entry.target.clone(),
                entry.max_response_time_ms.unwrap_or(base.max_response_time_ms),
                entry.auto_repair_enabled.unwrap_or(base.auto_repair_enabled),
                repair_strategy,
            );
            validate(&policy)?;
            defaults = defaults.with_policy(policy);
        }
        Ok(defaults)
    }

    /// Default policy for a target.
    pub fn get(&self, target: &str) -> Policy {
        match self.policies.get(target) {
            Some(policy) => policy.clone(),
            None => Policy {
                target: target.to_string(),
                ..self.fallback.clone()
            },
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

fn validate(policy: &Policy) -> StateResult<()> {
    if policy.target.trim().is_empty() {
        return Err(StateError::InvalidPolicy("empty target".into()));
    }
    if policy.max_response_time_ms == 0 {
        return Err(StateError::InvalidPolicy(format!(
            "{}: max_response_time_ms must be positive",
            policy.target
        )));
    }
    Ok(())
}

/// Live policies persisted in the state store.
#[derive(Clone)]
pub struct PolicyStore {
    state: StateStore,
    defaults: Arc<PolicyDefaults>,
}

impl PolicyStore {
    pub fn new(state: StateStore, defaults: PolicyDefaults) -> Self {
        Self {
            state,
            defaults: Arc::new(defaults),
        }
    }

    pub fn defaults(&self) -> &PolicyDefaults {
        &self.defaults
    }

    /// Stored policy, else the default for the target.
    pub fn get(&self, target: &str) -> StateResult<Policy> {
        match self.state.get_policy(target)? {
            Some(policy) => Ok(policy),
            None => Ok(self.defaults.get(target)),
        }
    }

    /// Stored policies merged with defaults for targets that have none,
    /// ordered by target.
    pub fn get_all(&self) -> StateResult<Vec<Policy>> {
        let mut merged: BTreeMap<String, Policy> = self
            .defaults
            .targets()
            .map(|t| (t.to_string(), self.defaults.get(t)))
            .collect();
        for policy in self.state.list_policies()? {
            merged.insert(policy.target.clone(), policy);
        }
        Ok(merged.into_values().collect())
    }

    /// Insert or replace the live policy for `policy.target`.
    pub fn upsert(&self, mut policy: Policy) -> StateResult<Policy> {
        validate(&policy)?;
        policy.last_updated_ms = epoch_millis();
        self.state.put_policy(&policy)?;
        info!(
            target = %policy.target,
            max_response_time_ms = policy.max_response_time_ms,
            auto_repair = policy.auto_repair_enabled,
            strategy = %policy.repair_strategy,
            "policy updated"
        );
        Ok(policy)
    }

    /// Seed every default policy that has no stored row. Existing rows are
    /// never overwritten. Returns the number inserted.
    pub fn initialize_defaults(&self) -> StateResult<usize> {
        let now = epoch_millis();
        let mut inserted = 0;
        for target in self.defaults.targets() {
            let mut policy = self.defaults.get(target);
            policy.last_updated_ms = now;
            if self.state.insert_policy_if_absent(&policy)? {
                inserted += 1;
            }
        }
        debug!(inserted, "default policies initialized");
        Ok(inserted)
    }

    /// Rewrite a target's live policy with its default.
    pub fn reset(&self, target: &str) -> StateResult<Policy> {
        let mut policy = self.defaults.get(target);
        policy.last_updated_ms = epoch_millis();
        self.state.put_policy(&policy)?;
        info!(%target, "policy reset to default");
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PolicyStore {
        PolicyStore::new(StateStore::open_in_memory().unwrap(), PolicyDefaults::builtin())
    }

    #[test]
    fn builtin_table() {
        let defaults = PolicyDefaults::builtin();
        assert_eq!(defaults.get("portal").max_response_time_ms, 500);
        assert!(!defaults.get("logs").auto_repair_enabled);
        assert_eq!(defaults.get("logs").repair_strategy, RepairStrategy::None);
        assert_eq!(defaults.get("analytics").max_response_time_ms, 2000);

        let unknown = defaults.get("payment-api");
        assert_eq!(unknown.target, "payment-api");
        assert_eq!(unknown.max_response_time_ms, 1000);
        assert!(!unknown.auto_repair_enabled);
    }

    #[test]
    fn from_config_overlays_builtin() {
        let defaults = PolicyDefaults::from_config(&[
            PolicyConfig {
                target: "portal".into(),
                max_response_time_ms: Some(750),
                auto_repair_enabled: None,
                repair_strategy: None,
            },
            PolicyConfig {
                target: "api".into(),
                max_response_time_ms: None,
                auto_repair_enabled: Some(true),
                repair_strategy: Some("rollback".into()),
            },
        ])
        .unwrap();

        let portal = defaults.get("portal");
        assert_eq!(portal.max_response_time_ms, 750);
        assert!(portal.auto_repair_enabled);

        let api = defaults.get("api");
        assert_eq!(api.max_response_time_ms, 1000);
        assert!(api.auto_repair_enabled);
        assert_eq!(api.repair_strategy, RepairStrategy::Rollback);
    }

    #[test]
    fn from_config_rejects_unknown_strategy() {
        let result = PolicyDefaults::from_config(&[PolicyConfig {
            target: "api".into(),
            max_response_time_ms: None,
            auto_repair_enabled: None,
            repair_strategy: Some("reboot".into()),
        }]);
        assert!(matches!(result, Err(StateError::InvalidPolicy(_))));
    }

    #[test]
    fn get_falls_back_to_defaults() {
        let policies = store();
        assert_eq!(policies.get("review").unwrap().max_response_time_ms, 1000);
        assert_eq!(policies.get("unknown").unwrap().target, "unknown");
    }

    #[test]
    fn upsert_then_get() {
        let policies = store();
        let updated = policies
            .upsert(Policy::new("portal", 300, false, RepairStrategy::Rebuild))
            .unwrap();
        assert!(updated.last_updated_ms > 0);

        let live = policies.get("portal").unwrap();
        assert_eq!(live.max_response_time_ms, 300);
        assert!(!live.auto_repair_enabled);
        assert_eq!(live.repair_strategy, RepairStrategy::Rebuild);
    }

    #[test]
    fn upsert_rejects_invalid() {
        let policies = store();
        assert!(policies
            .upsert(Policy::new("", 300, true, RepairStrategy::Restart))
            .is_err());
        assert!(policies
            .upsert(Policy::new("api", 0, true, RepairStrategy::Restart))
            .is_err());
    }

    #[test]
    fn initialize_defaults_is_idempotent_and_preserves_edits() {
        let policies = store();
        policies
            .upsert(Policy::new("portal", 123, false, RepairStrategy::None))
            .unwrap();

        let first = policies.initialize_defaults().unwrap();
        assert_eq!(first, 3);
        let second = policies.initialize_defaults().unwrap();
        assert_eq!(second, 0);

        assert_eq!(policies.get("portal").unwrap().max_response_time_ms, 123);
    }

    #[test]
    fn reset_restores_default() {
        let policies = store();
        policies
            .upsert(Policy::new("review", 50, false, RepairStrategy::None))
            .unwrap();
        let reset = policies.reset("review").unwrap();
        assert_eq!(reset.max_response_time_ms, 1000);
        assert_eq!(policies.get("review").unwrap(), reset);
    }

    #[test]
    fn get_all_merges_stored_and_defaults() {
        let policies = store();
        policies
            .upsert(Policy::new("payment-api", 400, true, RepairStrategy::Restart))
            .unwrap();
        let all = policies.get_all().unwrap();
        let targets: Vec<&str> = all.iter().map(|p| p.target.as_str()).collect();
        assert_eq!(
            targets,
            vec!["analytics", "logs", "payment-api", "portal", "review"]
        );
    }
}
