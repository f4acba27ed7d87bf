use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Info, Rule, RuleError, new_rule};
use crate::action::{Version, VersionReq};

type Slots = HashMap<String, BTreeMap<Version, Info>>;

/// In-memory catalogue of parsed rules, keyed by name and version.
///
/// Stores descriptors only; every [`RuleStore::instantiate`] builds a fresh
/// instance from the stored text.
#[derive(Default)]
pub struct RuleStore {
    rules: RwLock<Slots>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.rules.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.rules.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Stores `info` under its key, replacing any rule with the same key.
    pub fn register(&self, info: Info) -> String {
        let key = info.key();
        let mut rules = self.write();
        let versions = rules.entry(info.name.clone()).or_default();
        if versions.insert(info.version, info).is_some() {
            log::info!("rule {} already exists, overwritten", key);
        } else {
            log::info!("register rule {}", key);
        }
        key
    }

    pub fn get(&self, name: &str, version: VersionReq) -> Option<Info> {
        let rules = self.read();
        rules.get(name).and_then(|versions| match version {
            VersionReq::Latest => versions.values().next_back().cloned(),
            VersionReq::Exact(v) => versions.get(&v).cloned(),
        })
    }

    /// Builds a fresh, uncompiled instance of a stored rule. `None` when no
    /// such rule is stored.
    pub fn instantiate(
        &self,
        name: &str,
        version: VersionReq,
    ) -> Option<Result<Box<dyn Rule>, RuleError>> {
        let info = self.get(name, version)?;
        Some(new_rule(info.rule_type, &info.content))
    }

    /// Same semantics as [`crate::action::Registry::remove`].
    pub fn remove(&self, name: &str, version: VersionReq) -> bool {
        let mut rules = self.write();
        let removed = match version {
            VersionReq::Latest => rules.remove(name).is_some_and(|v| !v.is_empty()),
            VersionReq::Exact(v) => {
                let removed = rules
                    .get_mut(name)
                    .and_then(|versions| versions.remove(&v))
                    .is_some();
                if rules.get(name).is_some_and(BTreeMap::is_empty) {
                    rules.remove(name);
                }
                removed
            }
        };
        if removed {
            log::warn!("remove rule {}@{}", name, version);
        }
        removed
    }

    /// Every stored `name@version` key.
    pub fn list(&self) -> Vec<String> {
        let rules = self.read();
        let mut keys: Vec<String> = rules
            .values()
            .flat_map(|versions| versions.values().map(Info::key))
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleType;

    fn info(text: &str) -> Info {
        new_rule(RuleType::Lua, text).unwrap().info().clone()
    }

    #[test]
    fn test_register_and_instantiate_latest() {
        let store = RuleStore::new();
        store.register(info("rule_name = 'disk'\n--body--\n"));
        store.register(info("rule_name = 'disk'\nrule_version = 3\n--body--\n"));

        assert_eq!(store.list(), vec!["disk@1".to_string(), "disk@3".to_string()]);
        let rule = store
            .instantiate("disk", VersionReq::Latest)
            .unwrap()
            .unwrap();
        assert_eq!(rule.info().key(), "disk@3");
        assert!(!rule.is_compiled());
        assert!(store.instantiate("missing", VersionReq::Latest).is_none());
    }

    #[test]
    fn test_remove_exact_and_all() {
        let store = RuleStore::new();
        store.register(info("rule_name = 'a'\n--body--\n"));
        store.register(info("rule_name = 'a'\nrule_version = 2\n--body--\n"));

        assert!(store.remove("a", Version::major(2).into()));
        assert_eq!(store.get("a", VersionReq::Latest).unwrap().key(), "a@1");
        assert!(store.remove("a", VersionReq::Latest));
        assert!(store.list().is_empty());
        assert!(!store.remove("a", VersionReq::Latest));
    }
}
