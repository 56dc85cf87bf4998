//! CLI command implementations
//!
//! - [`run`] - long-running service: scheduler plus admin API
//! - [`trigger`] - one-shot commands (tick, manual triggers, status, schema)
//!
//! [`Components`] wires the stores, clients and coordinator from a [`Config`].

pub mod run;
pub mod trigger;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::feed::{
    EntrySync, EntryValidator, HttpSocialFeed, MentionPoller, SocialFeed, MENTIONS_BUCKET,
    TWEET_LOOKUP_BUCKET,
};
use crate::ledger::{JsonRpcLedger, LedgerClient, LogScanner};
use crate::lifecycle::RoundCoordinator;
use crate::limiter::RateLimiter;
use crate::lock::{LockManager, PgLockBackend};
use crate::rpc::{FailoverClient, HttpTransport};
use crate::storage::PgStore;

pub use run::run;
pub use trigger::{create_round, draw_winner, init_db, status, sync_entries, tick};

/// Everything a command needs, built once from configuration
pub struct Components {
    pub config: Config,
    pub store: Arc<PgStore>,
    pub rpc: Arc<FailoverClient>,
    pub sync: EntrySync,
    pub coordinator: Arc<RoundCoordinator>,
}

impl Components {
    pub async fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(PgStore::connect(&config.store_config()).await?);
        let locks = LockManager::new(
            Arc::new(PgLockBackend::new(store.pool().clone())),
            config.lock_timeout(),
        );

        let transport = Arc::new(HttpTransport::new(std::time::Duration::from_secs(
            config.ledger.connect_timeout_secs,
        ))?);
        let rpc = Arc::new(FailoverClient::new(
            config.ledger.endpoints.clone(),
            transport,
            config.failover_config(),
        )?);
        let ledger: Arc<dyn LedgerClient> =
            Arc::new(JsonRpcLedger::new(rpc.clone(), config.confirmation_policy()));

        let limiter = Arc::new(
            RateLimiter::new()
                .with_bucket(
                    MENTIONS_BUCKET,
                    config.social.mentions_capacity,
                    config.social.mentions_refill_per_sec,
                )?
                .with_bucket(
                    TWEET_LOOKUP_BUCKET,
                    config.social.lookup_capacity,
                    config.social.lookup_refill_per_sec,
                )?,
        );

        let feed: Arc<dyn SocialFeed> = Arc::new(HttpSocialFeed::new(config.feed_config())?);
        let poller = Arc::new(MentionPoller::new(
            feed.clone(),
            store.clone(),
            limiter.clone(),
            locks.clone(),
        ));
        let validator = Arc::new(EntryValidator::new(
            feed,
            ledger.clone(),
            store.clone(),
            limiter,
            locks.clone(),
        ));
        let sync = EntrySync::new(poller, validator);

        let coordinator = Arc::new(
            RoundCoordinator::new(
                ledger,
                store.clone(),
                locks,
                LogScanner::new(config.log_scan_config()),
                config.lifecycle.clone(),
            )
            .with_sync(sync.clone()),
        );

        Ok(Self {
            config,
            store,
            rpc,
            sync,
            coordinator,
        })
    }
}
