//! roundkeeper - round/freeze lifecycle coordinator
//!
//! Reconciles a social mention feed, a remote ledger reached over JSON-RPC
//! and a persistent pending-entry store. Rounds are opened, frozen with a
//! deterministic snapshot, and settled by a tick-driven state machine that is
//! safe to run on several instances at once.
//!
//! # Architecture
//!
//! - [`config`] - Configuration loading and startup validation
//! - [`limiter`] - Named token buckets with deferred (never rejected) grants
//! - [`rpc`] - Failover JSON-RPC client over ranked endpoints
//! - [`ledger`] - Typed ledger operations, token id encoding, log scanning
//! - [`lock`] - Named distributed locks (PostgreSQL advisory locks)
//! - [`scheduler`] - Safe recurring tasks with overrun policies
//! - [`storage`] - State and entry stores (PostgreSQL, in-memory)
//! - [`feed`] - Mention polling and entry validation
//! - [`lifecycle`] - Round phases, snapshots and the coordinator
//! - [`api`] - Admin HTTP API
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use roundkeeper::commands::Components;
//! use roundkeeper::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> roundkeeper::Result<()> {
//!     let config = Config::from_env()?;
//!     let components = Components::build(config).await?;
//!     let report = components.coordinator.tick().await?;
//!     println!("{:?}", report.action);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod lifecycle;
pub mod limiter;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod rpc;
pub mod scheduler;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, RoundkeeperErrorTrait};
    pub use crate::ledger::{LedgerClient, LedgerError};
    pub use crate::lifecycle::{LifecyclePhase, RoundCoordinator, TickAction, TickReport};
    pub use crate::lock::{DistributedLock, LockManager};
    pub use crate::models::{Entry, NewEntry, RoundInfo};
    pub use crate::scheduler::{OverrunPolicy, Scheduler, TaskOptions};
    pub use crate::storage::{EntryStore, StateStore, Store};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
