use thiserror::Error;

use crate::rule::RuleError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("invalid cron expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },

    #[error("cron engine is stopped")]
    Stopped,
}

#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error(
        "the following actions are not loaded in the pedestal, the rule cannot be executed: {}",
        .0.join(", ")
    )]
    ActionsNotLoaded(Vec<String>),

    #[error("worker pool is closed, task was not submitted")]
    PoolClosed,

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(
        "running rule failed, error: {error}; callback error: {}",
        .callback.as_deref().unwrap_or("none")
    )]
    RuleFailed {
        error: RuleError,
        callback: Option<String>,
    },

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error("no tokio runtime available, build the executor from within a runtime")]
    NoRuntime,

    #[error("task {0} panicked while running")]
    Panicked(String),
}

impl From<PoolError> for ExecutorError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Closed => ExecutorError::PoolClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_carries_callback_error() {
        let err = ExecutorError::RuleFailed {
            error: RuleError::Logical("disk full".to_string()),
            callback: Some("pager offline".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "running rule failed, error: disk full; callback error: pager offline"
        );

        let err = ExecutorError::RuleFailed {
            error: RuleError::Logical("disk full".to_string()),
            callback: None,
        };
        assert_eq!(
            err.to_string(),
            "running rule failed, error: disk full; callback error: none"
        );
    }

    #[test]
    fn test_actions_not_loaded_lists_missing_keys() {
        let err = ExecutorError::ActionsNotLoaded(vec!["disk@2".to_string(), "notify".to_string()]);
        assert!(err.to_string().starts_with(
            "the following actions are not loaded in the pedestal, the rule cannot be executed"
        ));
        assert!(err.to_string().ends_with("disk@2, notify"));
    }
}
