//! On-chain ledger access
//!
//! - [`client`] - the [`LedgerClient`] trait and its JSON-RPC implementation
//! - [`encoding`] - dual-range token id encoding
//! - [`logs`] - chunked, cached completion-log scanning
//! - [`error`] - ledger errors with decoded revert reasons

pub mod client;
pub mod encoding;
pub mod error;
pub mod logs;

pub use client::{ConfirmationPolicy, JsonRpcLedger, LedgerClient};
pub use error::LedgerError;
pub use logs::{Completion, LogScanConfig, LogScanner};
