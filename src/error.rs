//! Unified error handling for the roundkeeper crate
//!
//! Domain modules keep their own error enums; this module wraps them in a
//! single [`Error`] and classifies each one into an [`ErrorCategory`] that
//! drives how a failed tick or task is treated.
//!
//! # Architecture
//!
//! - [`RoundkeeperErrorTrait`] - Common interface implemented by the unified error
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use roundkeeper::error::{Error, ErrorCategory, RoundkeeperErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     match err.category() {
//!         ErrorCategory::TransientRetryable => tracing::warn!("Retrying next tick: {err}"),
//!         ErrorCategory::TerminalConfig => tracing::error!("Fix configuration: {err}"),
//!         _ => tracing::error!("{err}"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::feed::FeedError;
pub use crate::ledger::LedgerError;
pub use crate::lifecycle::LifecycleError;
pub use crate::limiter::LimiterError;
pub use crate::lock::LockError;
pub use crate::rpc::RpcError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::storage::StorageError;

/// Common trait for roundkeeper error types
pub trait RoundkeeperErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Timeouts, rate limits, connection failures; retry on the next tick
    TransientRetryable,
    /// A ledger write whose outcome is unknown; retrying is safe because
    /// writes carry idempotency keys
    IdempotencyGuarded,
    /// Bad configuration or programming error; retrying will not help
    TerminalConfig,
    /// Another instance holds the lock
    LockContention,
    /// Persistence failure
    Storage,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientRetryable => "transient",
            Self::IdempotencyGuarded => "idempotency_guarded",
            Self::TerminalConfig => "terminal_config",
            Self::LockContention => "lock_contention",
            Self::Storage => "storage",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the roundkeeper crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Rate limiter error: {0}")]
    Limiter(#[from] LimiterError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RoundkeeperErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Limiter(_) => false,
            Self::Rpc(e) => e.is_recoverable(),
            Self::Ledger(e) => e.is_recoverable(),
            Self::Lock(e) => e.is_recoverable(),
            Self::Storage(e) => e.is_recoverable(),
            Self::Feed(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            // Preconditions may hold on a later tick
            Self::Lifecycle(e) => !matches!(e, LifecycleError::SyncUnavailable),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Limiter(_) => ErrorCategory::TerminalConfig,
            Self::Rpc(e) => rpc_category(e),
            Self::Ledger(e) => match e {
                LedgerError::TxFailed { .. } | LedgerError::ConfirmationTimeout { .. } => {
                    ErrorCategory::IdempotencyGuarded
                }
                LedgerError::Rpc(rpc) => rpc_category(rpc),
                LedgerError::Revert { .. } | LedgerError::Decode { .. } => ErrorCategory::Other,
            },
            Self::Lock(e) => match e {
                LockError::Timeout { .. } => ErrorCategory::LockContention,
                LockError::Database(_) | LockError::Pool(_) => ErrorCategory::Storage,
            },
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Feed(e) if e.is_recoverable() => ErrorCategory::TransientRetryable,
            Self::Feed(_) => ErrorCategory::Other,
            Self::Scheduler(SchedulerError::InvalidOptions { .. }) => ErrorCategory::TerminalConfig,
            Self::Scheduler(_) => ErrorCategory::TransientRetryable,
            Self::Lifecycle(LifecycleError::SyncUnavailable) => ErrorCategory::TerminalConfig,
            Self::Lifecycle(_) => ErrorCategory::Other,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::TerminalConfig,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

fn rpc_category(err: &RpcError) -> ErrorCategory {
    match err {
        RpcError::NoEndpoints => ErrorCategory::TerminalConfig,
        e if e.is_recoverable() => ErrorCategory::TransientRetryable,
        _ => ErrorCategory::Other,
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
