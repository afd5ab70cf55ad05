use std::collections::{BTreeMap, HashMap, VecDeque};

use serde_json::Value;
use tracing::debug;

use tagstore_types::TypeKey;

/// A single hand-written upgrade step: payload at version N in, payload at
/// version N+1 out.
pub type MigrationFn = Box<dyn Fn(Value) -> Value + Send + Sync>;

/// Maximum number of distinct type names tracked, chain steps kept per
/// type, and steps applied in one upgrade.
const MAX_MIGRATION_DEPTH: usize = 10;

/// Per-type registry of schema versions and ordered upgrade chains.
///
/// Upgrades are applied step by step from the payload's version towards the
/// registered latest. A missing step stops the chain early and returns the
/// partially upgraded payload; that is not an error, because files written
/// by newer builds may reference versions this build knows nothing about.
pub struct MigrationRegistry {
    latest: HashMap<TypeKey, u32>,
    /// Registration order of type names, oldest first, for eviction.
    order: VecDeque<TypeKey>,
    chains: HashMap<TypeKey, BTreeMap<u32, MigrationFn>>,
    log: Vec<String>,
}

impl MigrationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            latest: HashMap::new(),
            order: VecDeque::new(),
            chains: HashMap::new(),
            log: Vec::new(),
        }
    }

    /// Record the latest schema version for a type.
    ///
    /// At most [`MAX_MIGRATION_DEPTH`] distinct type names are tracked; the
    /// oldest registration is evicted when the cap is exceeded.
    pub fn register_version(&mut self, type_key: TypeKey, latest: u32) {
        if self.latest.insert(type_key.clone(), latest).is_none() {
            self.order.push_back(type_key);
        }
        while self.latest.len() > MAX_MIGRATION_DEPTH {
            if let Some(evicted) = self.order.pop_front() {
                self.latest.remove(&evicted);
                debug!(type_key = %evicted, "evicted oldest version registration");
            }
        }
    }

    /// Register one upgrade step for a type, keyed by the version it
    /// upgrades *from*. Chains are trimmed from their lowest version when
    /// they exceed [`MAX_MIGRATION_DEPTH`] steps.
    pub fn register_migration(&mut self, type_key: TypeKey, from_version: u32, f: MigrationFn) {
        let chain = self.chains.entry(type_key).or_default();
        chain.insert(from_version, f);
        while chain.len() > MAX_MIGRATION_DEPTH {
            let lowest = *chain.keys().next().expect("non-empty chain");
            chain.remove(&lowest);
        }
    }

    /// Latest registered version for a type; 1 when unknown.
    pub fn latest_version(&self, type_key: &TypeKey) -> u32 {
        self.latest.get(type_key).copied().unwrap_or(1)
    }

    /// Upgrade a payload from `current_version` towards the latest
    /// registered version.
    ///
    /// Stops when the latest version is reached, when no step exists for
    /// the current version, or after [`MAX_MIGRATION_DEPTH`] applied steps.
    /// Every applied step is appended to the in-memory migration log.
    pub fn upgrade_to_latest(
        &mut self,
        type_key: &TypeKey,
        current_version: u32,
        data: Value,
    ) -> Value {
        let latest = self.latest_version(type_key);
        let Some(chain) = self.chains.get(type_key) else {
            return data;
        };

        let mut upgraded = data;
        let mut current = current_version;
        let mut applied = 0;
        while current < latest && applied < MAX_MIGRATION_DEPTH {
            let Some(step) = chain.get(&current) else {
                break;
            };
            upgraded = step(upgraded);
            self.log.push(format!(
                "[MIGRATION] Type: {type_key} | v{current} -> v{}",
                current + 1
            ));
            debug!(%type_key, from = current, to = current + 1, "applied migration step");
            current += 1;
            applied += 1;
        }
        upgraded
    }

    /// The in-memory migration log, oldest entry first.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Clear the migration log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("types", &self.latest.len())
            .field("log_entries", &self.log.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str) -> TypeKey {
        TypeKey::new(name)
    }

    fn bump_step(field: &'static str) -> MigrationFn {
        Box::new(move |mut v| {
            if let Some(n) = v.get(field).and_then(Value::as_i64) {
                v[field] = json!(n + 1);
            }
            v
        })
    }

    // -----------------------------------------------------------------------
    // Upgrade chains
    // -----------------------------------------------------------------------

    #[test]
    fn upgrade_applies_steps_in_order() {
        let mut reg = MigrationRegistry::new();
        reg.register_version(key("X"), 3);
        reg.register_migration(key("X"), 1, bump_step("n"));
        reg.register_migration(key("X"), 2, bump_step("n"));

        let out = reg.upgrade_to_latest(&key("X"), 1, json!({"n": 0}));
        assert_eq!(out, json!({"n": 2}));
        assert_eq!(reg.log().len(), 2);
        assert!(reg.log()[0].contains("v1 -> v2"));
        assert!(reg.log()[1].contains("v2 -> v3"));
    }

    #[test]
    fn upgrade_at_latest_is_noop() {
        let mut reg = MigrationRegistry::new();
        reg.register_version(key("X"), 3);
        reg.register_migration(key("X"), 1, bump_step("n"));
        reg.register_migration(key("X"), 2, bump_step("n"));

        let out = reg.upgrade_to_latest(&key("X"), 3, json!({"n": 0}));
        assert_eq!(out, json!({"n": 0}));
        assert!(reg.log().is_empty());
    }

    #[test]
    fn missing_step_stops_early_without_error() {
        let mut reg = MigrationRegistry::new();
        reg.register_version(key("X"), 4);
        reg.register_migration(key("X"), 1, bump_step("n"));
        // No step for v2 -> v3.
        reg.register_migration(key("X"), 3, bump_step("n"));

        let out = reg.upgrade_to_latest(&key("X"), 1, json!({"n": 0}));
        // Only the v1 step applies; the chain stops at the gap.
        assert_eq!(out, json!({"n": 1}));
        assert_eq!(reg.log().len(), 1);
    }

    #[test]
    fn unknown_type_passes_payload_through() {
        let mut reg = MigrationRegistry::new();
        let out = reg.upgrade_to_latest(&key("nope"), 1, json!({"n": 9}));
        assert_eq!(out, json!({"n": 9}));
    }

    #[test]
    fn upgrade_caps_at_ten_steps() {
        let mut reg = MigrationRegistry::new();
        reg.register_version(key("X"), 20);
        for from in 1..=10u32 {
            reg.register_migration(key("X"), from, bump_step("n"));
        }

        let out = reg.upgrade_to_latest(&key("X"), 1, json!({"n": 0}));
        assert_eq!(out, json!({"n": 10}));
        assert_eq!(reg.log().len(), 10);
    }

    // -----------------------------------------------------------------------
    // Capacity bounds
    // -----------------------------------------------------------------------

    #[test]
    fn oldest_version_registration_is_evicted() {
        let mut reg = MigrationRegistry::new();
        for i in 0..11 {
            reg.register_version(key(&format!("T{i}")), 5);
        }
        // T0 fell off; unknown types default to version 1.
        assert_eq!(reg.latest_version(&key("T0")), 1);
        assert_eq!(reg.latest_version(&key("T10")), 5);
    }

    #[test]
    fn re_registering_updates_in_place() {
        let mut reg = MigrationRegistry::new();
        reg.register_version(key("X"), 2);
        reg.register_version(key("X"), 7);
        assert_eq!(reg.latest_version(&key("X")), 7);
    }

    #[test]
    fn chain_trims_lowest_version_past_capacity() {
        let mut reg = MigrationRegistry::new();
        reg.register_version(key("X"), 20);
        for from in 1..=11u32 {
            reg.register_migration(key("X"), from, bump_step("n"));
        }
        // The v1 step was trimmed, so an upgrade from v1 finds no step.
        let out = reg.upgrade_to_latest(&key("X"), 1, json!({"n": 0}));
        assert_eq!(out, json!({"n": 0}));
        // Upgrading from v2 still works.
        let out = reg.upgrade_to_latest(&key("X"), 2, json!({"n": 0}));
        assert_eq!(out, json!({"n": 10}));
    }

    // -----------------------------------------------------------------------
    // Log API
    // -----------------------------------------------------------------------

    #[test]
    fn clear_log_empties_entries() {
        let mut reg = MigrationRegistry::new();
        reg.register_version(key("X"), 2);
        reg.register_migration(key("X"), 1, bump_step("n"));
        reg.upgrade_to_latest(&key("X"), 1, json!({"n": 0}));
        assert_eq!(reg.log().len(), 1);

        reg.clear_log();
        assert!(reg.log().is_empty());
    }
}
