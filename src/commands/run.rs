//! Long-running service
//!
//! Three scheduled tasks share one process:
//!
//! - `lifecycle-tick` every `automation_check_ms`, runs immediately
//! - `mention-poller` every `poll_interval_ms`
//! - `entry-validator` every `validate_interval_ms`
//!
//! Each runs under the `skip` overrun policy unless configured otherwise;
//! cross-instance exclusion comes from the distributed locks inside each
//! step. The admin API runs alongside until Ctrl-C.

use std::sync::Arc;

use crate::api::{ApiServer, AppState};
use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::scheduler::Scheduler;

use super::Components;

pub async fn run(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics registration failed, continuing without metrics");
    }

    let components = Components::build(config).await?;
    components.store.init_schema().await?;
    let config = &components.config;

    let mut scheduler = Scheduler::new();

    let coordinator = Arc::clone(&components.coordinator);
    let lifecycle = config
        .task_options(config.lifecycle.automation_check_ms)
        .run_immediately(true);
    scheduler.every("lifecycle-tick", lifecycle, move || {
        let coordinator = Arc::clone(&coordinator);
        async move {
            coordinator.tick().await?;
            Ok::<(), anyhow::Error>(())
        }
    })?;

    let poller = Arc::clone(components.sync.poller());
    scheduler.every(
        "mention-poller",
        config.task_options(config.scheduler.poll_interval_ms),
        move || {
            let poller = Arc::clone(&poller);
            async move {
                poller.poll().await?;
                Ok::<(), anyhow::Error>(())
            }
        },
    )?;

    let validator = Arc::clone(components.sync.validator());
    scheduler.every(
        "entry-validator",
        config.task_options(config.scheduler.validate_interval_ms),
        move || {
            let validator = Arc::clone(&validator);
            async move {
                validator.validate().await?;
                Ok::<(), anyhow::Error>(())
            }
        },
    )?;

    tracing::info!(
        tick_ms = config.lifecycle.automation_check_ms,
        poll_ms = config.scheduler.poll_interval_ms,
        validate_ms = config.scheduler.validate_interval_ms,
        "Scheduler started"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    };

    if config.api.enabled {
        let state = AppState::new(
            Arc::clone(&components.coordinator),
            config.api.api_key.clone(),
            scheduler.handles().cloned().collect(),
        );
        let server = ApiServer::new(&config.api.bind, state)?;
        server.start_with_shutdown(shutdown).await?;
    } else {
        shutdown.await;
    }

    tracing::info!("Shutting down scheduler");
    scheduler.shutdown().await;
    Ok(())
}
