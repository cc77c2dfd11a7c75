use thiserror::Error;

use crate::lifecycle::InvalidTransition;

/// Every way a lifecycle event can fail. Each variant ends up as a failed
/// custom resource and therefore a failed deployment; none are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("ConfigurationError: {0}")]
    Configuration(String),

    #[error("StatementExecutionError: statement {index} failed: {message}")]
    StatementExecution { index: usize, message: String },

    #[error(
        "TimeoutError: handler did not finish within {budget_ms}ms; \
         an unknown subset of statements may have been applied"
    )]
    Timeout { budget_ms: u128 },

    #[error("LifecycleError: {0}")]
    Lifecycle(#[from] InvalidTransition),

    #[error("HandlerCrashed: {0}")]
    Crashed(String),
}

impl RunnerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::StatementExecution { .. } => "StatementExecutionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Lifecycle(_) => "LifecycleError",
            Self::Crashed(_) => "HandlerCrashed",
        }
    }

    /// Index of the statement that triggered the failure, when there is one.
    pub fn statement_index(&self) -> Option<usize> {
        match self {
            Self::StatementExecution { index, .. } => Some(*index),
            _ => None,
        }
    }
}
