use std::sync::Arc;

use thiserror::Error;

use crate::action::{ActionInfo, Registry, VersionReq};
use crate::execute::{BuiltInExecutor, Executor, ExecutorConfig, ExecutorError, Params};
use crate::rule::{RuleError, RuleStore, RuleType, new_rule};

#[derive(Debug, Clone, Error)]
pub enum PedestalError {
    #[error("rule {name}@{version} not found")]
    RuleNotFound { name: String, version: VersionReq },

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// One engine instance: an action registry, a rule store and an executor
/// wired together.
pub struct Pedestal {
    registry: Arc<Registry>,
    rules: RuleStore,
    executor: BuiltInExecutor,
}

impl Pedestal {
    /// Must be called from within a tokio runtime.
    pub fn new(config: ExecutorConfig) -> Result<Self, PedestalError> {
        let registry = Arc::new(Registry::new());
        let executor = BuiltInExecutor::new(Arc::clone(&registry), config)?;
        Ok(Pedestal {
            registry,
            rules: RuleStore::new(),
            executor,
        })
    }

    pub fn start(&self) -> Result<(), PedestalError> {
        Ok(self.executor.start()?)
    }

    pub fn stop(&self) -> Result<(), PedestalError> {
        Ok(self.executor.stop()?)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn executor(&self) -> &BuiltInExecutor {
        &self.executor
    }

    /// Parses `content` and stores it. Returns the rule key.
    pub fn add_rule(&self, content: &str, rule_type: RuleType) -> Result<String, PedestalError> {
        let rule = new_rule(rule_type, content)?;
        Ok(self.rules.register(rule.info().clone()))
    }

    /// Queues a fresh instance of a stored rule. Returns the task id.
    pub fn run_rule(
        &self,
        name: &str,
        version: VersionReq,
        params: Params,
    ) -> Result<String, PedestalError> {
        let rule = self
            .rules
            .instantiate(name, version)
            .ok_or_else(|| PedestalError::RuleNotFound {
                name: name.to_string(),
                version,
            })??;
        Ok(self.executor.add_task(rule, params, None)?)
    }

    pub fn list_actions(&self) -> Vec<ActionInfo> {
        self.registry.describe()
    }
}
