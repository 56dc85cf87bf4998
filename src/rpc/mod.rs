//! Failover JSON-RPC client for the remote ledger
//!
//! - [`endpoint`] - ranked endpoints and their local request windows
//! - [`transport`] - one JSON-RPC request against one endpoint
//! - [`failover`] - timeout race, failover and backoff between passes
//! - [`error`] - attempt and terminal errors

pub mod endpoint;
pub mod error;
pub mod failover;
pub mod transport;

pub use endpoint::{EndpointConfig, EndpointStats, RpcEndpoint};
pub use error::RpcError;
pub use failover::{FailoverClient, FailoverConfig};
pub use transport::{HttpTransport, RpcTransport};
