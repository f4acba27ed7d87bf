use thiserror::Error;

use crate::context::ContextError;

#[derive(Debug, Clone, Error)]
pub enum RuleError {
    #[error("unknown rule name")]
    UnknownRuleName,

    #[error("dependency format error")]
    DependencyFormat,

    #[error("malformed definition in the rule description section")]
    MalformedDefinition,

    #[error("unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("dependency recipient '{0}' is not declared by the rule")]
    UnknownRecipient(String),

    #[error("parameter '{0}' would shadow a dependency or builtin")]
    ReservedName(String),

    #[error("dependency recipient '{0}' is not bound")]
    UnboundDependency(String),

    #[error("rule is not compiled")]
    NotCompiled,

    /// Interpreter errors, syntax errors included, passed through as is.
    #[error("script error: {0}")]
    Script(#[from] mlua::Error),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// A failure the rule body reported through `fail(...)`.
    #[error("{0}")]
    Logical(String),
}
