//! Admin server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::lifecycle::RoundCoordinator;
use crate::scheduler::TaskHandle;

use super::handlers::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RoundCoordinator>,

    /// Required `x-api-key` value, if any
    pub api_key: Option<Arc<str>>,

    /// Background tasks reported by `/api/status`
    pub tasks: Arc<Vec<TaskHandle>>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        coordinator: Arc<RoundCoordinator>,
        api_key: Option<String>,
        tasks: Vec<TaskHandle>,
    ) -> Self {
        Self {
            coordinator,
            api_key: api_key.map(Arc::from),
            tasks: Arc::new(tasks),
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Admin Server
// ============================================================================

pub struct ApiServer {
    bind: SocketAddr,
    state: AppState,
}

impl ApiServer {
    pub fn new(bind: &str, state: AppState) -> Result<Self> {
        let bind = bind
            .parse()
            .map_err(|e| Error::config(format!("invalid api bind address '{bind}': {e}")))?;
        Ok(Self { bind, state })
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();

        tracing::info!(bind = %self.bind, "Starting admin API");
        let listener = tokio::net::TcpListener::bind(self.bind).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!("Admin API shutdown complete");
        Ok(())
    }
}
