//! Mention poller: new mentions become pending entries
//!
//! A mention carries one wallet (`0x` + 40 hex digits) and one or more token
//! ids written as `#<digits>`. One entry is inserted per (mention, token id);
//! re-inserting the same pair is a no-op, so a crash between inserting and
//! advancing the high-water mark only causes harmless reprocessing.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::ledger::encoding::decode;
use crate::limiter::RateLimiter;
use crate::lock::LockManager;
use crate::metrics;
use crate::models::{Mention, NewEntry};
use crate::storage::{Store, MENTIONS_SINCE_KEY};

use super::client::compare_ids;
use super::{SocialFeed, MENTIONS_BUCKET};

static WALLET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]{40}\b").unwrap());

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d{1,39})\b").unwrap());

/// Lock held for the duration of one poll
pub const POLLER_LOCK: &str = "mention-poller";

/// Wallet and token ids extracted from a mention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMention {
    pub wallet: String,
    pub token_ids: Vec<u128>,
}

/// Extract the first wallet and every distinct token id, in order of
/// appearance. `None` when either is missing.
pub fn parse_mention(text: &str) -> Option<ParsedMention> {
    let wallet = WALLET_REGEX.find(text)?.as_str().to_string();

    let mut token_ids: Vec<u128> = Vec::new();
    for caps in TOKEN_REGEX.captures_iter(text) {
        // Encoded ids are accepted and stored in base form
        let Ok(id) = caps[1].parse::<u128>().map(decode) else {
            continue;
        };
        if token_ids.contains(&id) {
            continue;
        }
        token_ids.push(id);
    }

    if token_ids.is_empty() {
        return None;
    }
    Some(ParsedMention { wallet, token_ids })
}

/// Outcome of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Mentions without a wallet or token id
    pub ignored: usize,
    /// High-water mark after the poll
    pub since_id: Option<String>,
}

pub struct MentionPoller {
    feed: Arc<dyn SocialFeed>,
    store: Arc<dyn Store>,
    limiter: Arc<RateLimiter>,
    locks: LockManager,
}

impl MentionPoller {
    pub fn new(
        feed: Arc<dyn SocialFeed>,
        store: Arc<dyn Store>,
        limiter: Arc<RateLimiter>,
        locks: LockManager,
    ) -> Self {
        Self {
            feed,
            store,
            limiter,
            locks,
        }
    }

    /// Poll once under the poller lock; `None` if another instance holds it
    pub async fn poll(&self) -> Result<Option<PollReport>> {
        let outcome = self.locks.with_lock(POLLER_LOCK, || self.poll_locked()).await?;
        if outcome.is_none() {
            tracing::debug!("Mention poll already running elsewhere, skipping");
        }
        outcome.transpose()
    }

    async fn poll_locked(&self) -> Result<PollReport> {
        let since = self.store.get(MENTIONS_SINCE_KEY).await?;

        let mentions = self
            .limiter
            .run(MENTIONS_BUCKET, 1.0, || self.feed.fetch_mentions_since(since.as_deref()))
            .await??;

        let mut report = PollReport {
            fetched: mentions.len(),
            since_id: since.clone(),
            ..Default::default()
        };

        for mention in &mentions {
            self.ingest(mention, &mut report).await?;
        }

        let newest = mentions
            .iter()
            .map(|m| m.id.as_str())
            .max_by(|a, b| compare_ids(a, b));
        if let Some(newest) = newest {
            let advances = since
                .as_deref()
                .map_or(true, |s| compare_ids(newest, s).is_gt());
            if advances {
                self.store.set(MENTIONS_SINCE_KEY, newest).await?;
                report.since_id = Some(newest.to_string());
            }
        }

        metrics::record_entries("ingested", report.inserted as u64);
        tracing::info!(
            fetched = report.fetched,
            inserted = report.inserted,
            duplicates = report.duplicates,
            ignored = report.ignored,
            since_id = report.since_id.as_deref().unwrap_or("-"),
            "Mention poll complete"
        );
        Ok(report)
    }

    async fn ingest(&self, mention: &Mention, report: &mut PollReport) -> Result<()> {
        let Some(parsed) = parse_mention(&mention.text) else {
            report.ignored += 1;
            tracing::trace!(mention = %mention.id, "Mention carries no entry");
            return Ok(());
        };

        for token_id in parsed.token_ids {
            let entry = NewEntry::new(parsed.wallet.clone(), token_id, mention.id.clone());
            if self.store.insert_entry(&entry).await? {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }
        Ok(())
    }
}
