//! Rules: a descriptor plus a dynamically compiled body.
//!
//! Every rule backend implements [`Rule`]. A rule is built from raw text,
//! wired to its actions and parameters, compiled once, then run any number
//! of times:
//!
//! 1. **Parse**: the descriptor region yields an immutable [`Info`]
//! 2. **Bind**: [`Rule::add_rely_on`] and [`Rule::set`] fill the binding table
//! 3. **Compile**: [`Rule::compile`] wires the bindings into the interpreter
//!    and compiles the body; later calls are no-ops
//! 4. **Run**: [`Rule::run`] executes the compiled body under an
//!    [`ExecContext`]
//!
//! [`LuaRule`] is the embedded Lua backend.

pub mod binding;
pub mod descriptor;
pub mod error;
pub mod lua;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{Action, Value, Version};
use crate::context::ExecContext;

pub use binding::ErrorSink;
pub use error::RuleError;
pub use lua::LuaRule;
pub use store::RuleStore;

/// The script backend a rule is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Lua,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Lua => f.write_str("lua"),
        }
    }
}

impl FromStr for RuleType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lua" => Ok(RuleType::Lua),
            other => Err(RuleError::UnknownRuleType(other.to_string())),
        }
    }
}

/// The parsed descriptor of a rule. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Info {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) author: String,
    pub(crate) rule_type: RuleType,
    pub(crate) version: Version,
    #[serde(skip)]
    pub(crate) content: String,
    pub(crate) rely_on: BTreeMap<String, String>,
    pub(crate) params: BTreeMap<String, Value>,
}

impl Info {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// The raw rule text the descriptor was parsed from.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Dependency key (`name` or `name@version`) -> recipient binding name.
    pub fn rely_on(&self) -> &BTreeMap<String, String> {
        &self.rely_on
    }

    /// Parameter name -> default value.
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// The contract every rule backend satisfies.
pub trait Rule: Send {
    fn info(&self) -> &Info;

    /// Stores a parameter value for `recipient`.
    fn set(&mut self, recipient: &str, value: Value) -> Result<(), RuleError>;

    /// Binds `action` to the declared dependency `recipient`.
    fn add_rely_on(&mut self, recipient: &str, action: Arc<dyn Action>) -> Result<(), RuleError>;

    /// Evaluates `name` against the interpreter state, usually after a run.
    fn get(&self, name: &str) -> Result<Value, RuleError>;

    /// Compiles the body. Idempotent: a compiled rule stays compiled.
    fn compile(&mut self) -> Result<(), RuleError>;

    /// Runs the compiled body. A failure reported by the body itself is
    /// returned like any execution error.
    fn run(&mut self, ctx: &ExecContext) -> Result<(), RuleError>;

    fn is_compiled(&self) -> bool;
}

impl fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("key", &self.info().key())
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// Builds a rule of the given type from raw text.
pub fn new_rule(rule_type: RuleType, content: &str) -> Result<Box<dyn Rule>, RuleError> {
    match rule_type {
        RuleType::Lua => Ok(Box::new(LuaRule::new(content)?)),
    }
}
