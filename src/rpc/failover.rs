//! Failover client over a static, priority-ranked endpoint list
//!
//! Each attempt races the request against a fixed timeout. Timeouts,
//! rate-limit responses and transport failures move straight on to the next
//! endpoint; exponential backoff only applies between full passes over the
//! list. Priority order never changes at runtime.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::metrics;
use crate::utils::retry::{backoff, RetryConfig};

use super::endpoint::{EndpointConfig, EndpointStats, RpcEndpoint};
use super::error::RpcError;
use super::transport::RpcTransport;

/// Failover behavior
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Per-attempt timeout
    pub call_timeout: Duration,

    /// Length of the per-endpoint request window
    pub window: Duration,

    /// Passes over the endpoint list: `max_retries` extra passes with
    /// exponential backoff between them
    pub passes: RetryConfig,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            window: Duration::from_secs(60),
            passes: RetryConfig::with_delays(2, 500, 8_000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Read,
    Write,
}

impl CallKind {
    fn label(self) -> &'static str {
        match self {
            Self::Read => "call",
            Self::Write => "send",
        }
    }
}

/// Executes JSON-RPC methods across ranked endpoints
pub struct FailoverClient {
    endpoints: Mutex<Vec<RpcEndpoint>>,
    transport: Arc<dyn RpcTransport>,
    config: FailoverConfig,
}

impl FailoverClient {
    /// Build a client; endpoints are ordered by ascending priority
    pub fn new(
        endpoints: Vec<EndpointConfig>,
        transport: Arc<dyn RpcTransport>,
        config: FailoverConfig,
    ) -> Result<Self, RpcError> {
        if endpoints.is_empty() {
            return Err(RpcError::NoEndpoints);
        }

        let mut ranked: Vec<RpcEndpoint> = endpoints.into_iter().map(RpcEndpoint::new).collect();
        ranked.sort_by_key(|e| e.config.priority);

        Ok(Self {
            endpoints: Mutex::new(ranked),
            transport,
            config,
        })
    }

    /// Read-only operation
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.execute(CallKind::Read, method, &params).await
    }

    /// State-changing operation
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.execute(CallKind::Write, method, &params).await
    }

    /// Per-endpoint counters, in priority order
    pub fn endpoint_stats(&self) -> Vec<EndpointStats> {
        self.lock().iter().map(RpcEndpoint::stats).collect()
    }

    async fn execute(&self, kind: CallKind, method: &str, params: &Value) -> Result<Value, RpcError> {
        let endpoint_count = self.lock().len();
        let passes = self.config.passes.total_attempts();
        let mut last_error: Option<RpcError> = None;

        for pass in 0..passes {
            if pass > 0 {
                backoff(&self.config.passes, pass, "rpc-pass").await;
            }

            for index in 0..endpoint_count {
                let Some(url) = self.reserve(index) else {
                    tracing::trace!(index = index, "Endpoint over local budget, skipping");
                    continue;
                };

                let started = Instant::now();
                let result = match tokio::time::timeout(
                    self.config.call_timeout,
                    self.transport.request(&url, method, params),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::Timeout {
                        timeout_ms: self.config.call_timeout.as_millis() as u64,
                    }),
                };
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(value) => {
                        self.with_endpoint(index, RpcEndpoint::record_success);
                        metrics::record_rpc_request(&url, kind.label(), "ok");
                        if index > 0 {
                            tracing::info!(
                                endpoint = %url,
                                method = method,
                                pass = pass,
                                "RPC served by fallback endpoint"
                            );
                        }
                        return Ok(value);
                    }
                    Err(err) => {
                        self.with_endpoint(index, |e| {
                            e.record_failure();
                            if err.is_rate_limit() {
                                e.mark_rate_limited();
                            }
                        });
                        metrics::record_rpc_request(&url, kind.label(), "error");

                        if !err.should_failover() {
                            return Err(err);
                        }

                        tracing::warn!(
                            endpoint = %url,
                            method = method,
                            pass = pass,
                            duration_ms = elapsed_ms,
                            error = %err,
                            "RPC attempt failed, trying next endpoint"
                        );
                        last_error = Some(err);
                    }
                }
            }
        }

        let last_error = last_error.unwrap_or(RpcError::BudgetExhausted);
        tracing::error!(
            method = method,
            kind = kind.label(),
            passes = passes,
            error = %last_error,
            "RPC failed on every endpoint"
        );
        Err(RpcError::Exhausted {
            passes,
            last_error: Box::new(last_error),
        })
    }

    fn reserve(&self, index: usize) -> Option<String> {
        let window = self.config.window;
        let mut endpoints = self.lock();
        let endpoint = endpoints.get_mut(index)?;
        endpoint
            .try_reserve(window)
            .then(|| endpoint.config.url.clone())
    }

    fn with_endpoint(&self, index: usize, f: impl FnOnce(&mut RpcEndpoint)) {
        if let Some(endpoint) = self.lock().get_mut(index) {
            f(endpoint);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RpcEndpoint>> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
