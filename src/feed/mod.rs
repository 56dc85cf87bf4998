//! Social feed ingestion
//!
//! - [`client`] - [`SocialFeed`] trait and its HTTP implementation
//! - [`poller`] - turns new mentions into pending entries
//! - [`validator`] - re-checks source posts and on-ledger ownership
//!
//! Every feed call is metered through a named token bucket before it is
//! made: [`MENTIONS_BUCKET`] for mention fetches, [`TWEET_LOOKUP_BUCKET`] for
//! existence checks.

pub mod client;
pub mod poller;
pub mod validator;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::Result;
use crate::models::Mention;

pub use client::{FeedConfig, HttpSocialFeed};
pub use poller::{parse_mention, MentionPoller, ParsedMention, PollReport};
pub use validator::{EntryValidator, ValidationReport};

/// Bucket metering mention fetches
pub const MENTIONS_BUCKET: &str = "mentions";

/// Bucket metering post existence checks
pub const TWEET_LOOKUP_BUCKET: &str = "tweet-lookup";

/// Social feed API failures
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Feed API rate limit hit")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Unexpected feed response: {0}")]
    Decode(String),
}

impl FeedError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Social feed operations the core depends on
#[async_trait]
pub trait SocialFeed: Send + Sync {
    /// Mentions newer than `since_id`, oldest first
    async fn fetch_mentions_since(&self, since_id: Option<&str>) -> Result<Vec<Mention>, FeedError>;

    /// Whether the post still exists upstream
    async fn tweet_exists(&self, id: &str) -> Result<bool, FeedError>;
}

/// Poller then validator, as one refresh of the entry pool
#[derive(Clone)]
pub struct EntrySync {
    poller: Arc<MentionPoller>,
    validator: Arc<EntryValidator>,
}

/// Outcome of one [`EntrySync::refresh`]
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncReport {
    pub poll: Option<PollReport>,
    pub validation: Option<ValidationReport>,
}

impl EntrySync {
    pub fn new(poller: Arc<MentionPoller>, validator: Arc<EntryValidator>) -> Self {
        Self { poller, validator }
    }

    pub fn poller(&self) -> &Arc<MentionPoller> {
        &self.poller
    }

    pub fn validator(&self) -> &Arc<EntryValidator> {
        &self.validator
    }

    /// Poll new mentions, then validate the pool. Each half runs under its
    /// own lock and reports `None` when another instance held it.
    pub async fn refresh(&self) -> Result<SyncReport> {
        let poll = self.poller.poll().await?;
        let validation = self.validator.validate().await?;
        Ok(SyncReport { poll, validation })
    }
}
