use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use super::{Action, Version, VersionReq, parse_key};

/// Summary of a registered action, as listed to front ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionInfo {
    pub name: String,
    pub version: Version,
    pub description: String,
}

type Slots = HashMap<String, BTreeMap<Version, Arc<dyn Action>>>;

/// Versioned store of action implementations.
///
/// Reads run concurrently; writes are exclusive. Nothing here blocks on I/O.
#[derive(Default)]
pub struct Registry {
    actions: RwLock<Slots>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.actions.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.actions.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Inserts the action into its exact `(name, version)` slot, replacing
    /// whatever was there.
    pub fn register(&self, action: Arc<dyn Action>) {
        let key = action.key();
        log::info!("register action {}", key);
        let mut actions = self.write();
        let versions = actions.entry(action.name().to_string()).or_default();
        if versions.insert(action.version(), action).is_some() {
            log::info!("action {} already exists, overwritten", key);
        }
    }

    /// Removes one version, or every version under `name` for
    /// [`VersionReq::Latest`]. Returns whether anything was removed.
    pub fn remove(&self, name: &str, version: VersionReq) -> bool {
        let mut actions = self.write();
        match version {
            VersionReq::Latest => {
                log::warn!("remove all actions named {}", name);
                actions
                    .remove(name)
                    .is_some_and(|versions| !versions.is_empty())
            }
            VersionReq::Exact(v) => {
                log::warn!("remove action {}@{}", name, v);
                let removed = actions
                    .get_mut(name)
                    .and_then(|versions| versions.remove(&v))
                    .is_some();
                if actions.get(name).is_some_and(BTreeMap::is_empty) {
                    actions.remove(name);
                }
                removed
            }
        }
    }

    /// Removes every action.
    pub fn clear(&self) {
        log::warn!("clean all actions");
        self.write().clear();
    }

    /// Looks up an exact version, or the highest one for [`VersionReq::Latest`].
    pub fn get(&self, name: &str, version: VersionReq) -> Option<Arc<dyn Action>> {
        let actions = self.read();
        let found = actions.get(name).and_then(|versions| match version {
            VersionReq::Latest => versions.values().next_back().cloned(),
            VersionReq::Exact(v) => versions.get(&v).cloned(),
        });
        match &found {
            Some(action) => log::debug!("get action {}", action.key()),
            None => log::warn!("get action {}@{} failed, not registered", name, version),
        }
        found
    }

    /// Resolves a dependency key (`name` or `name@version`).
    pub fn get_by_key(&self, key: &str) -> Option<Arc<dyn Action>> {
        let (name, version) = parse_key(key)?;
        self.get(name, version)
    }

    /// Every registered `name@version` key.
    pub fn list(&self) -> Vec<String> {
        let actions = self.read();
        let keys: Vec<String> = actions
            .values()
            .flat_map(|versions| versions.values().map(|a| a.key()))
            .collect();
        log::debug!("current actions: {}", keys.join(";"));
        keys
    }

    /// Name, version and description of every registered action.
    pub fn describe(&self) -> Vec<ActionInfo> {
        let actions = self.read();
        actions
            .values()
            .flat_map(|versions| versions.values())
            .map(|a| ActionInfo {
                name: a.name().to_string(),
                version: a.version(),
                description: a.description().to_string(),
            })
            .collect()
    }

    /// Returns the keys that are absent, in the caller's order and form.
    ///
    /// A bare name is satisfied by any version; malformed keys are always
    /// reported as absent.
    pub fn check_exist<S: AsRef<str>>(&self, keys: &[S]) -> Vec<String> {
        let actions = self.read();
        keys.iter()
            .map(AsRef::as_ref)
            .filter(|key| {
                let Some((name, version)) = parse_key(key) else {
                    return true;
                };
                match (actions.get(name), version) {
                    (None, _) => true,
                    (Some(versions), VersionReq::Latest) => versions.is_empty(),
                    (Some(versions), VersionReq::Exact(v)) => !versions.contains_key(&v),
                }
            })
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{FnAction, Outputs, Value};

    fn stub(name: &str, version: Version) -> Arc<dyn Action> {
        let tag = format!("{name}@{version}");
        FnAction::new(name, version, move |_: &[Value]| {
            let mut out = Outputs::new();
            out.insert("from".to_string(), Value::from(tag.as_str()));
            Ok(out)
        })
        .shared()
    }

    #[test]
    fn test_latest_returns_highest_version() {
        let registry = Registry::new();
        registry.register(stub("A", Version::major(1)));
        registry.register(stub("A", Version::major(2)));

        let latest = registry.get("A", VersionReq::Latest).unwrap();
        assert_eq!(latest.key(), "A@2");
        let exact = registry.get("A", Version::major(1).into()).unwrap();
        assert_eq!(exact.key(), "A@1");
    }

    #[test]
    fn test_register_overwrites_same_slot() {
        let registry = Registry::new();
        registry.register(stub("A", Version::major(1)));
        let replacement = FnAction::new("A", Version::major(1), |_: &[Value]| Ok(Outputs::new()))
            .with_description("replacement")
            .shared();
        registry.register(replacement);

        assert_eq!(registry.list(), vec!["A@1".to_string()]);
        let found = registry.get("A", VersionReq::Latest).unwrap();
        assert_eq!(found.description(), "replacement");
    }

    #[test]
    fn test_remove_latest_clears_all_versions() {
        let registry = Registry::new();
        registry.register(stub("A", Version::major(1)));
        registry.register(stub("A", Version::major(2)));
        registry.register(stub("B", Version::major(1)));

        assert!(registry.remove("A", VersionReq::Latest));
        assert!(registry.get("A", VersionReq::Latest).is_none());
        assert_eq!(registry.list(), vec!["B@1".to_string()]);
        assert!(!registry.remove("A", VersionReq::Latest));
    }

    #[test]
    fn test_remove_exact_keeps_other_versions() {
        let registry = Registry::new();
        registry.register(stub("A", Version::major(1)));
        registry.register(stub("A", Version::major(2)));

        assert!(registry.remove("A", Version::major(2).into()));
        assert_eq!(registry.get("A", VersionReq::Latest).unwrap().key(), "A@1");
        assert!(!registry.remove("A", Version::major(5).into()));
    }

    #[test]
    fn test_check_exist_preserves_caller_form() {
        let registry = Registry::new();
        registry.register(stub("A", Version::major(1)));

        assert_eq!(registry.check_exist(&["A@1", "B"]), vec!["B".to_string()]);
        assert_eq!(
            registry.check_exist(&["A", "A@2", "A@x", "A@1@2"]),
            vec!["A@2".to_string(), "A@x".to_string(), "A@1@2".to_string()]
        );
        assert!(registry.check_exist::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_describe_and_get_by_key() {
        let registry = Registry::new();
        registry.register(stub("disk", Version::new(1.5).unwrap()));

        let info = registry.describe();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].name, "disk");
        assert_eq!(info[0].version, Version::new(1.5).unwrap());

        assert!(registry.get_by_key("disk@1.5").is_some());
        assert!(registry.get_by_key("disk").is_some());
        assert!(registry.get_by_key("disk@2").is_none());
        assert!(registry.get_by_key("disk@@").is_none());
    }
}
