//! JSON-RPC transport
//!
//! [`RpcTransport`] performs exactly one request against one endpoint. All
//! retry, timeout and failover decisions belong to the failover client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

/// One request against one endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, url: &str, method: &str, params: &Value) -> Result<Value, RpcError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC 2.0 over HTTP POST
pub struct HttpTransport {
    client: Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport; `connect_timeout` bounds connection setup only
    pub fn new(connect_timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .gzip(true)
            .user_agent(format!("roundkeeper/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, url: &str, method: &str, params: &Value) -> Result<Value, RpcError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RpcError::RateLimited);
        }
        if !status.is_success() {
            return Err(RpcError::Http(status.as_u16()));
        }

        let payload: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        if let Some(error) = payload.error {
            return Err(RpcError::Remote {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        payload
            .result
            .ok_or_else(|| RpcError::Malformed("response has neither result nor error".into()))
    }
}
