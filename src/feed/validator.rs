//! Entry validator
//!
//! For every un-pushed entry, grouped by source post:
//! 1. the post must still exist, otherwise every entry from it is purged
//! 2. the claimed wallet must own the token on the ledger
//!
//! Only the `verified` flag changes, and only when it differs. Entries
//! already pushed to a round are never touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::ledger::LedgerClient;
use crate::limiter::RateLimiter;
use crate::lock::LockManager;
use crate::metrics;
use crate::models::Entry;
use crate::storage::Store;

use super::{SocialFeed, TWEET_LOOKUP_BUCKET};

/// Lock held for the duration of one validation pass
pub const VALIDATOR_LOCK: &str = "entry-validator";

/// Outcome of one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub sources_checked: usize,
    pub sources_removed: usize,
    pub entries_purged: u64,
    pub newly_verified: usize,
    pub newly_unverified: usize,
    pub unchanged: usize,
}

pub struct EntryValidator {
    feed: Arc<dyn SocialFeed>,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn Store>,
    limiter: Arc<RateLimiter>,
    locks: LockManager,
}

impl EntryValidator {
    pub fn new(
        feed: Arc<dyn SocialFeed>,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn Store>,
        limiter: Arc<RateLimiter>,
        locks: LockManager,
    ) -> Self {
        Self {
            feed,
            ledger,
            store,
            limiter,
            locks,
        }
    }

    /// Validate once under the validator lock; `None` if another instance holds it
    pub async fn validate(&self) -> Result<Option<ValidationReport>> {
        let outcome = self
            .locks
            .with_lock(VALIDATOR_LOCK, || self.validate_locked())
            .await?;
        if outcome.is_none() {
            tracing::debug!("Entry validation already running elsewhere, skipping");
        }
        outcome.transpose()
    }

    async fn validate_locked(&self) -> Result<ValidationReport> {
        let entries = self.store.unpushed_entries().await?;

        let mut by_source: BTreeMap<String, Vec<Entry>> = BTreeMap::new();
        for entry in entries {
            by_source.entry(entry.source_id.clone()).or_default().push(entry);
        }

        let mut report = ValidationReport::default();
        for (source_id, entries) in by_source {
            report.sources_checked += 1;

            let exists = self
                .limiter
                .run(TWEET_LOOKUP_BUCKET, 1.0, || self.feed.tweet_exists(&source_id))
                .await??;

            if !exists {
                let purged = self.store.purge_source(&source_id).await?;
                report.sources_removed += 1;
                report.entries_purged += purged;
                tracing::info!(source = %source_id, purged = purged, "Source post gone, entries purged");
                continue;
            }

            for entry in entries {
                self.check_ownership(&entry, &mut report).await?;
            }
        }

        metrics::record_entries("verified", report.newly_verified as u64);
        metrics::record_entries("unverified", report.newly_unverified as u64);
        metrics::record_entries("purged", report.entries_purged);
        tracing::info!(
            sources = report.sources_checked,
            removed = report.sources_removed,
            verified = report.newly_verified,
            unverified = report.newly_unverified,
            "Entry validation complete"
        );
        Ok(report)
    }

    async fn check_ownership(&self, entry: &Entry, report: &mut ValidationReport) -> Result<()> {
        let owner = self.ledger.owner_of(entry.token_id).await?;
        let owns = owner
            .as_deref()
            .is_some_and(|o| o.eq_ignore_ascii_case(&entry.wallet));

        if owns == entry.verified {
            report.unchanged += 1;
            return Ok(());
        }

        self.store.set_verified(entry.id, owns).await?;
        if owns {
            report.newly_verified += 1;
        } else {
            report.newly_unverified += 1;
            tracing::debug!(
                entry = entry.id,
                token_id = %entry.token_id,
                owner = owner.as_deref().unwrap_or("none"),
                "Entry no longer owned by claimant"
            );
        }
        Ok(())
    }
}
