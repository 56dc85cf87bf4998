//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Clone)]
pub enum SchedulerError {
    /// Task options failed validation
    InvalidOptions {
        field: String,
        reason: String,
    },

    /// An invocation exceeded its timeout and was abandoned
    Timeout {
        label: String,
        timeout_ms: u64,
    },

    /// The task body panicked
    Panicked {
        label: String,
        message: String,
    },

    /// The task body returned an error
    Failed {
        label: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOptions { field, reason } => {
                write!(f, "Invalid task option '{}': {}", field, reason)
            }
            Self::Timeout { label, timeout_ms } => {
                write!(f, "Task '{}' timed out after {}ms", label, timeout_ms)
            }
            Self::Panicked { label, message } => {
                write!(f, "Task '{}' panicked: {}", label, message)
            }
            Self::Failed { label, reason } => {
                write!(f, "Task '{}' failed: {}", label, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid options error
    pub fn invalid_options(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short outcome label used in logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidOptions { .. } => "invalid",
            Self::Timeout { .. } => "timeout",
            Self::Panicked { .. } => "panic",
            Self::Failed { .. } => "failure",
        }
    }

    /// Invocation failures are retried; bad options are not
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidOptions { .. })
    }
}
