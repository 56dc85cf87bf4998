//! Error types for the RPC layer

use thiserror::Error;

/// Errors produced by a single RPC attempt or by the failover client
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// The attempt did not complete within the per-call timeout
    #[error("RPC call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The endpoint answered with a rate-limit response
    #[error("Endpoint rate limited the request")]
    RateLimited,

    /// Connection or protocol failure before a usable response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status other than 429
    #[error("HTTP status {0}")]
    Http(u16),

    /// JSON-RPC error object returned by the endpoint
    #[error("RPC error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Response body could not be interpreted
    #[error("Malformed RPC response: {0}")]
    Malformed(String),

    /// Every endpoint was skipped or failed on every pass
    #[error("All RPC endpoints exhausted after {passes} passes: {last_error}")]
    Exhausted { passes: u32, last_error: Box<RpcError> },

    /// Every endpoint was over its local request budget
    #[error("All endpoints are over their local request budget")]
    BudgetExhausted,

    /// No endpoints configured
    #[error("No RPC endpoints configured")]
    NoEndpoints,
}

impl RpcError {
    /// Whether the next endpoint should be tried
    pub fn should_failover(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited | Self::Transport(_) | Self::BudgetExhausted => {
                true
            }
            Self::Http(status) => *status >= 500,
            Self::Remote { code, .. } => is_rate_limit_code(*code),
            Self::Malformed(_) | Self::Exhausted { .. } | Self::NoEndpoints => false,
        }
    }

    /// Whether this error should mark the endpoint's window budget as spent
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::Remote { code, .. } => is_rate_limit_code(*code),
            _ => false,
        }
    }

    /// Transient errors are worth retrying on a later tick
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Exhausted { last_error, .. } => last_error.is_recoverable(),
            Self::Remote { code, .. } => is_rate_limit_code(*code),
            Self::Malformed(_) | Self::NoEndpoints => false,
            _ => true,
        }
    }
}

/// JSON-RPC codes commonly used by providers for request-rate rejections
fn is_rate_limit_code(code: i64) -> bool {
    matches!(code, -32005 | -32029 | 429)
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout { timeout_ms: 0 };
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return Self::RateLimited;
            }
            return Self::Http(status.as_u16());
        }
        if err.is_decode() {
            return Self::Malformed(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}
