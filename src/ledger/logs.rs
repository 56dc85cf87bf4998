//! Completion detection by scanning recent ledger logs
//!
//! The scan covers `[head - lookback, head]` split into chunks aligned to
//! multiples of `max_range`, so every chunk except the one containing the
//! head keeps the same key between ticks and is served from the cache.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::models::LedgerEvent;

use super::client::LedgerClient;
use super::error::LedgerError;

/// Emitted when a winner is drawn
pub const WINNER_SELECTED: &str = "WinnerSelected";

/// Emitted when a round closes without a winner
pub const ROUND_COMPLETED_NO_WINNER: &str = "RoundCompletedNoWinner";

pub const COMPLETION_EVENTS: [&str; 2] = [WINNER_SELECTED, ROUND_COMPLETED_NO_WINNER];

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct LogScanConfig {
    /// How many blocks behind the head to search
    pub lookback_blocks: u64,

    /// Largest block span per log query
    pub max_range: u64,

    /// How long a chunk result stays valid
    pub cache_ttl: Duration,
}

impl Default for LogScanConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: 5_000,
            max_range: 1_000,
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// How a round ended, as observed in the logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Completion {
    Winner {
        round_id: u64,
        winner: Option<String>,
        token_id: Option<u128>,
        block_number: u64,
    },
    NoWinner {
        round_id: u64,
        block_number: u64,
    },
}

impl Completion {
    fn from_event(event: &LedgerEvent) -> Option<Self> {
        let round_id = event.round_id()?;
        match event.name.as_str() {
            WINNER_SELECTED => Some(Self::Winner {
                round_id,
                winner: event.arg_str("winner"),
                token_id: event
                    .arg_str("tokenId")
                    .and_then(|t| super::encoding::parse_token_id(&t))
                    .map(super::encoding::decode),
                block_number: event.block_number,
            }),
            ROUND_COMPLETED_NO_WINNER => Some(Self::NoWinner {
                round_id,
                block_number: event.block_number,
            }),
            _ => None,
        }
    }

    pub fn round_id(&self) -> u64 {
        match self {
            Self::Winner { round_id, .. } | Self::NoWinner { round_id, .. } => *round_id,
        }
    }
}

struct CachedChunk {
    fetched_at: Instant,
    events: Vec<LedgerEvent>,
}

/// Chunked, cached completion-log scanner
pub struct LogScanner {
    config: LogScanConfig,
    cache: HashMap<(u64, u64), CachedChunk>,
}

impl LogScanner {
    pub fn new(config: LogScanConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    /// Aligned `(from, to)` chunks covering `[head - lookback, head]`
    pub fn chunks(&self, head: u64) -> Vec<(u64, u64)> {
        let size = self.config.max_range.max(1);
        let start = head.saturating_sub(self.config.lookback_blocks);
        let mut chunks = Vec::new();
        let mut from = start;
        while from <= head {
            let aligned_end = (from / size + 1) * size - 1;
            let to = aligned_end.min(head);
            chunks.push((from, to));
            if to == u64::MAX {
                break;
            }
            from = to + 1;
        }
        chunks
    }

    /// Look for the completion event of `round_id` in recent blocks
    pub async fn find_completion(
        &mut self,
        ledger: &dyn LedgerClient,
        round_id: u64,
    ) -> Result<Option<Completion>, LedgerError> {
        self.evict_expired();

        let head = ledger.block_number().await?;
        for (from, to) in self.chunks(head) {
            let events = self.chunk_events(ledger, from, to).await?;
            if let Some(found) = events
                .iter()
                .filter_map(Completion::from_event)
                .find(|c| c.round_id() == round_id)
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn chunk_events(
        &mut self,
        ledger: &dyn LedgerClient,
        from: u64,
        to: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        if let Some(cached) = self.cache.get(&(from, to)) {
            return Ok(cached.events.clone());
        }

        let events = ledger.query_logs(&COMPLETION_EVENTS, from, to).await?;
        tracing::trace!(from = from, to = to, count = events.len(), "Scanned log chunk");
        self.cache.insert(
            (from, to),
            CachedChunk {
                fetched_at: Instant::now(),
                events: events.clone(),
            },
        );
        Ok(events)
    }

    fn evict_expired(&mut self) {
        let ttl = self.config.cache_ttl;
        self.cache
            .retain(|_, chunk| chunk.fetched_at.elapsed() < ttl);
    }

    pub fn cached_chunks(&self) -> usize {
        self.cache.len()
    }
}
