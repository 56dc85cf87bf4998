//! Ledger errors and structured revert decoding

use serde_json::Value;
use thiserror::Error;

use crate::rpc::RpcError;

/// Errors from typed ledger operations
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    /// The contract rejected the call with a decoded custom error
    #[error("Ledger reverted with {name}({})", join_args(.args))]
    Revert { name: String, args: Vec<Value> },

    /// The transaction was mined but failed
    #[error("Transaction {tx_hash} failed on-chain")]
    TxFailed { tx_hash: String },

    /// Confirmation depth was not reached in time
    #[error("Transaction {tx_hash} not confirmed after {waited_secs}s")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    /// A response could not be mapped to the expected shape
    #[error("Unexpected ledger response for {method}: {reason}")]
    Decode { method: String, reason: String },

    /// Underlying RPC failure
    #[error(transparent)]
    Rpc(RpcError),
}

fn join_args(args: &[Value]) -> String {
    args.iter()
        .map(|a| match a {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl LedgerError {
    pub fn decode(method: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Lift an RPC error, decoding structured revert data when present
    ///
    /// Gateways report custom errors as `error.data = {"name": .., "args": [..]}`
    /// (or `errorName` / `errorArgs`).
    pub fn from_rpc(err: RpcError) -> Self {
        if let RpcError::Remote {
            data: Some(Value::Object(ref data)),
            ..
        } = err
        {
            let name = data
                .get("name")
                .or_else(|| data.get("errorName"))
                .and_then(Value::as_str);
            if let Some(name) = name {
                let args = data
                    .get("args")
                    .or_else(|| data.get("errorArgs"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                return Self::Revert {
                    name: name.to_string(),
                    args,
                };
            }
        }
        Self::Rpc(err)
    }

    /// Transient failures are retried on the next tick
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Rpc(e) => e.is_recoverable(),
            Self::ConfirmationTimeout { .. } => true,
            Self::Revert { .. } | Self::TxFailed { .. } | Self::Decode { .. } => false,
        }
    }
}

impl From<RpcError> for LedgerError {
    fn from(err: RpcError) -> Self {
        Self::from_rpc(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_structured_revert() {
        let err = LedgerError::from_rpc(RpcError::Remote {
            code: 3,
            message: "execution reverted".into(),
            data: Some(json!({ "name": "RoundStillActive", "args": ["5", 1700000000] })),
        });

        match &err {
            LedgerError::Revert { name, args } => {
                assert_eq!(name, "RoundStillActive");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(err.to_string(), "Ledger reverted with RoundStillActive(5, 1700000000)");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_alternate_field_names() {
        let err = LedgerError::from_rpc(RpcError::Remote {
            code: 3,
            message: "execution reverted".into(),
            data: Some(json!({ "errorName": "SnapshotAlreadyPushed", "errorArgs": [] })),
        });
        assert!(matches!(err, LedgerError::Revert { ref name, .. } if name == "SnapshotAlreadyPushed"));
    }

    #[test]
    fn test_plain_rpc_error_passes_through() {
        let err = LedgerError::from_rpc(RpcError::Timeout { timeout_ms: 100 });
        assert!(matches!(err, LedgerError::Rpc(RpcError::Timeout { .. })));
        assert!(err.is_recoverable());
    }
}
