//! # Pedestal
//!
//! A rule execution engine: register versioned actions, write rules as small
//! Lua scripts that call those actions by name, then run the rules
//! immediately, through a bounded worker pool, or on a cron schedule.
//!
//! ## Features
//!
//! - **Versioned Actions**: `name@version` keys, with "latest" lookups and
//!   last-write-wins registration
//! - **Compile Once, Run Many**: rules bind their actions and parameters,
//!   compile once, and can be run repeatedly on the same interpreter
//! - **Logical Failures**: a rule body calls `fail(msg)` to fail its task
//!   without raising a Lua error; later action calls become no-ops
//! - **Queued, Pooled and Recurring Tasks**: FIFO dispatch onto a bounded
//!   pool, plus cron and `@every` schedules
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pedestal::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PedestalError> {
//!     let pedestal = Pedestal::new(ExecutorConfig::default())?;
//!     pedestal.registry().register(
//!         FnAction::new("disk", Version::major(1), |_params: &[Value]| {
//!             let mut out = Outputs::new();
//!             out.insert("usage".to_string(), Value::from(93_i64));
//!             Ok(out)
//!         })
//!         .shared(),
//!     );
//!
//!     pedestal.add_rule(
//!         r#"
//! rule_name = "disk_check"
//! rule_rely_on = { disk = "disk" }
//! rule_params = { threshold = 90 }
//! --body--
//! if disk().usage > threshold then fail("disk almost full") end
//! "#,
//!         RuleType::Lua,
//!     )?;
//!
//!     pedestal.start()?;
//!     let id = pedestal.run_rule("disk_check", VersionReq::Latest, Params::new())?;
//!     println!("queued task {id}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`action`]: the [`Action`] trait, [`Value`] and the versioned [`Registry`]
//! - [`rule`]: the [`Rule`] trait, descriptor parsing and the Lua backend
//! - [`execute`]: the [`Executor`] trait and [`BuiltInExecutor`]
//! - [`context`]: cancellation and timeouts for running rules
//! - [`prelude`]: commonly used types (import with `use pedestal::prelude::*`)

// ============================================================================
// Modules
// ============================================================================

pub mod action;
pub mod context;
pub mod engine;
pub mod execute;
pub mod rule;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Actions
pub use action::{
    Action, ActionError, ActionInfo, FnAction, Outputs, Registry, Value, ValueError, ValueKind,
    Version, VersionReq,
};

// Rules
pub use context::{ContextError, ExecContext};
pub use rule::{Info, LuaRule, Rule, RuleError, RuleStore, RuleType, new_rule};

// Execution
pub use engine::{Pedestal, PedestalError};
pub use execute::{
    BuiltInExecutor, Callback, Executor, ExecutorConfig, ExecutorError, Params, Task,
    TaskSnapshot, TaskStatus, TaskType,
};

// ============================================================================
// Prelude
// ============================================================================

/// Everything needed to register actions, add rules and run tasks.
///
/// # Example
/// ```rust
/// use pedestal::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Actions
        Action,
        ActionError,
        // Execution
        BuiltInExecutor,
        Callback,
        ExecContext,
        Executor,
        ExecutorConfig,
        ExecutorError,
        FnAction,
        Outputs,
        Params,
        Pedestal,
        PedestalError,
        Registry,
        // Rules
        Rule,
        RuleError,
        RuleType,
        TaskStatus,
        TaskType,
        Value,
        Version,
        VersionReq,
        new_rule,
    };
}

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
