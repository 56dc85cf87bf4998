//! Tick-driven round coordinator
//!
//! Each tick reads the current round from the ledger, derives the phase and
//! performs at most one state-mutating step:
//!
//! | Phase                | Action                                                 |
//! |----------------------|--------------------------------------------------------|
//! | `NoRound`/`Completed`| open a round if the eligible pool is non-empty         |
//! | `Active`             | none                                                   |
//! | `InFreezeWindow`     | push the snapshot once, guarded by lock and markers    |
//! | `AwaitingSettlement` | scan recent logs for the completion event              |
//!
//! All reads happen before any write within a tick. A failed ledger call
//! leaves every marker untouched so the next tick retries the same step.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::feed::{EntrySync, SyncReport};
use crate::ledger::{Completion, LedgerClient, LogScanner};
use crate::lock::LockManager;
use crate::metrics;
use crate::models::RoundInfo;
use crate::storage::Store;
use crate::utils::{unix_now, BoundedSet};

use super::markers::{draw_tx_key, FreezeMarkers};
use super::snapshot::build_snapshot;
use super::state::{freeze_push_allowed, LifecyclePhase};
use super::{
    freeze_lock, LifecycleConfig, LifecycleError, DRAW_WINNER_LOCK, ROUND_CREATION_LOCK,
};

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TickAction {
    /// Nothing to do in this phase
    None,
    /// No round is open and the eligible pool is empty
    PoolEmpty,
    /// Another instance holds the lock for this step
    LockBusy { lock: String },
    /// A round was opened meanwhile; nothing created
    RoundAlreadyOpen { round: u64 },
    RoundCreated { round: u64, tx_hash: String },
    /// Markers already set; no ledger write
    AlreadyFrozen { round: u64 },
    Frozen {
        round: u64,
        snapshot_size: usize,
        tx_hash: Option<String>,
        digest: String,
    },
    /// Only the safety margin is left and no push happened
    FreezeMissed { round: u64 },
    AwaitingSettlement { round: u64 },
    Settled { completion: Completion },
}

/// Phase observed and action taken by one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub phase: LifecyclePhase,
    pub round: Option<u64>,
    pub action: TickAction,
}

/// Result of a manual draw request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DrawOutcome {
    Drawn { round: u64, tx_hash: String },
    AlreadyDrawn { round: u64, tx_hash: String },
    LockBusy,
}

/// Snapshot of coordinator state for operators
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub now: i64,
    pub phase: LifecyclePhase,
    pub round: Option<RoundInfo>,
    pub remaining_secs: Option<i64>,
    pub eligible_entries: u64,
    pub markers: Option<FreezeMarkers>,
}

pub struct RoundCoordinator {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn Store>,
    locks: LockManager,
    sync: Option<EntrySync>,
    scanner: tokio::sync::Mutex<LogScanner>,
    announced: Mutex<BoundedSet<u64>>,
    config: LifecycleConfig,
}

impl RoundCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn Store>,
        locks: LockManager,
        scanner: LogScanner,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            locks,
            sync: None,
            scanner: tokio::sync::Mutex::new(scanner),
            announced: Mutex::new(BoundedSet::new(config.announced_capacity)),
            config,
        }
    }

    /// Refresh the pool through `sync` before every snapshot
    pub fn with_sync(mut self, sync: EntrySync) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(unix_now()).await
    }

    /// One tick with an explicit clock reading (unix seconds)
    pub async fn tick_at(&self, now: i64) -> Result<TickReport> {
        let _timer = metrics::start_tick_timer();

        let round = self.current_round().await?;
        let phase = LifecyclePhase::determine(round.as_ref(), now, &self.config);
        let round_number = round.as_ref().map(|r| r.round_number);
        metrics::record_tick(phase.as_str());

        let action = match (phase, round) {
            (LifecyclePhase::NoRound, _) => self.open_round(now, false).await?,
            (LifecyclePhase::Completed, Some(round)) => {
                self.observe_completed(&round, None).await?;
                self.open_round(now, false).await?
            }
            (LifecyclePhase::Active, _) => TickAction::None,
            (LifecyclePhase::InFreezeWindow, Some(round)) => {
                if freeze_push_allowed(&round, now, &self.config) {
                    self.freeze(&round).await?
                } else {
                    self.freeze_missed(&round).await?
                }
            }
            (LifecyclePhase::AwaitingSettlement, Some(round)) => {
                self.check_settlement(&round).await?
            }
            (_, None) => TickAction::None,
        };

        tracing::debug!(
            phase = %phase,
            round = round_number.unwrap_or(0),
            action = ?action,
            "Lifecycle tick"
        );
        Ok(TickReport {
            phase,
            round: round_number,
            action,
        })
    }

    /// Current round from the ledger, with completion observed locally
    /// (from logs) folded in
    async fn current_round(&self) -> Result<Option<RoundInfo>> {
        let id = self.ledger.current_round_id().await?;
        metrics::set_current_round(id);
        if id == 0 {
            return Ok(None);
        }

        let mut round = self.ledger.get_round(id).await?;
        if !round.is_completed {
            if let Some(mirror) = self.store.get_round(id).await? {
                if mirror.is_completed {
                    round.is_completed = true;
                    round.is_active = false;
                    round.winner = round.winner.or(mirror.winner);
                    round.winning_token_id = round.winning_token_id.or(mirror.winning_token_id);
                }
            }
        }
        Ok(Some(round))
    }

    // ------------------------------------------------------------------
    // Round creation
    // ------------------------------------------------------------------

    /// Manual trigger: open a round now, even with an empty pool
    pub async fn create_round(&self) -> Result<TickAction> {
        self.create_round_at(unix_now()).await
    }

    pub async fn create_round_at(&self, now: i64) -> Result<TickAction> {
        self.open_round(now, true).await
    }

    async fn open_round(&self, now: i64, forced: bool) -> Result<TickAction> {
        if !forced {
            if !self.config.auto_create {
                return Ok(TickAction::None);
            }
            if self.store.count_eligible().await? == 0 {
                return Ok(TickAction::PoolEmpty);
            }
        }

        let outcome = self
            .locks
            .with_lock(ROUND_CREATION_LOCK, || self.open_round_locked(now))
            .await?;

        match outcome {
            Some(action) => action,
            None => Ok(TickAction::LockBusy {
                lock: ROUND_CREATION_LOCK.to_string(),
            }),
        }
    }

    async fn open_round_locked(&self, now: i64) -> Result<TickAction> {
        // Another instance may have created one between our read and the lock
        if let Some(existing) = self.current_round().await? {
            let phase = LifecyclePhase::determine(Some(&existing), now, &self.config);
            if !phase.allows_new_round() {
                return Ok(TickAction::RoundAlreadyOpen {
                    round: existing.round_number,
                });
            }
        }

        let start = now - self.config.start_skew_sec;
        let end = now + self.config.round_duration_sec;
        let receipt = self.ledger.create_round(start, end).await?;

        let id = self.ledger.current_round_id().await?;
        let round = self.ledger.get_round(id).await?;
        self.store.upsert_round(&round).await?;
        metrics::set_current_round(id);

        tracing::info!(
            round = id,
            start = start,
            end = end,
            tx_hash = %receipt.tx_hash,
            "Round created"
        );
        Ok(TickAction::RoundCreated {
            round: id,
            tx_hash: receipt.tx_hash,
        })
    }

    // ------------------------------------------------------------------
    // Freeze
    // ------------------------------------------------------------------

    /// Push the snapshot of `round` unless its markers say it was done
    pub async fn freeze(&self, round: &RoundInfo) -> Result<TickAction> {
        let lock = freeze_lock(round.round_number);
        let outcome = self
            .locks
            .with_lock(&lock, || self.freeze_locked(round))
            .await?;

        match outcome {
            Some(action) => action,
            None => Ok(TickAction::LockBusy { lock }),
        }
    }

    async fn freeze_locked(&self, round: &RoundInfo) -> Result<TickAction> {
        let n = round.round_number;

        let markers = FreezeMarkers::load(self.store.as_ref(), n).await?;
        if markers.is_set() {
            tracing::trace!(round = n, "Round already frozen");
            return Ok(TickAction::AlreadyFrozen { round: n });
        }

        if let Some(sync) = &self.sync {
            // A stale pool is better than no snapshot
            if let Err(e) = sync.refresh().await {
                tracing::warn!(round = n, error = %e, "Pre-freeze entry refresh failed, using current pool");
            }
        }

        let entries = self.store.entries_for_round(n).await?;
        let snapshot = build_snapshot(&entries);
        let digest = snapshot.digest();

        if snapshot.is_empty() {
            FreezeMarkers::persist(self.store.as_ref(), n, None).await?;
            metrics::record_snapshot(0, false);
            tracing::info!(round = n, "Empty snapshot, round frozen without push");
            return Ok(TickAction::Frozen {
                round: n,
                snapshot_size: 0,
                tx_hash: None,
                digest,
            });
        }

        let receipt = self
            .ledger
            .push_snapshot(n, &snapshot.owners(), &snapshot.encoded_token_ids())
            .await?;

        // Entries first: a crash before the markers re-snapshots the same set
        let marked = self
            .store
            .mark_pushed(snapshot.entry_ids(), n, &receipt.tx_hash, Utc::now())
            .await?;
        FreezeMarkers::persist(self.store.as_ref(), n, Some(&receipt.tx_hash)).await?;
        metrics::record_snapshot(snapshot.len(), true);

        tracing::info!(
            round = n,
            size = snapshot.len(),
            entries_marked = marked,
            digest = %digest,
            tx_hash = %receipt.tx_hash,
            "Snapshot pushed"
        );
        Ok(TickAction::Frozen {
            round: n,
            snapshot_size: snapshot.len(),
            tx_hash: Some(receipt.tx_hash),
            digest,
        })
    }

    async fn freeze_missed(&self, round: &RoundInfo) -> Result<TickAction> {
        let n = round.round_number;
        let markers = FreezeMarkers::load(self.store.as_ref(), n).await?;
        if markers.is_set() {
            return Ok(TickAction::AlreadyFrozen { round: n });
        }
        tracing::warn!(
            round = n,
            end = round.end_time,
            "Freeze window passed the safety margin without a snapshot push"
        );
        Ok(TickAction::FreezeMissed { round: n })
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    async fn check_settlement(&self, round: &RoundInfo) -> Result<TickAction> {
        let n = round.round_number;
        let found = self
            .scanner
            .lock()
            .await
            .find_completion(self.ledger.as_ref(), n)
            .await?;

        match found {
            Some(completion) => {
                self.observe_completed(round, Some(&completion)).await?;
                Ok(TickAction::Settled { completion })
            }
            None => Ok(TickAction::AwaitingSettlement { round: n }),
        }
    }

    /// Mirror a completed round locally and announce it once
    async fn observe_completed(
        &self,
        round: &RoundInfo,
        completion: Option<&Completion>,
    ) -> Result<()> {
        let mut mirror = RoundInfo {
            is_active: false,
            is_completed: true,
            ..round.clone()
        };
        if let Some(Completion::Winner {
            winner, token_id, ..
        }) = completion
        {
            mirror.winner = mirror.winner.or_else(|| winner.clone());
            mirror.winning_token_id = mirror.winning_token_id.or(*token_id);
        }

        let announced = self
            .announced
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&mirror.round_number);
        if announced {
            return Ok(());
        }

        // Only a written mirror counts as announced
        self.store.upsert_round(&mirror).await?;
        let first_sighting = self
            .announced
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(mirror.round_number);
        if !first_sighting {
            return Ok(());
        }
        match (&mirror.winner, mirror.winning_token_id) {
            (Some(winner), token) => tracing::info!(
                round = mirror.round_number,
                winner = %winner,
                token_id = %token.map(|t| t.to_string()).unwrap_or_default(),
                "Round completed with a winner"
            ),
            (None, _) => tracing::info!(round = mirror.round_number, "Round completed without a winner"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Manual triggers
    // ------------------------------------------------------------------

    /// Ask the ledger to draw the winner of the current round, at most once
    pub async fn draw_winner(&self) -> Result<DrawOutcome> {
        self.draw_winner_at(unix_now()).await
    }

    pub async fn draw_winner_at(&self, now: i64) -> Result<DrawOutcome> {
        let round = self.current_round().await?.ok_or(LifecycleError::NoRound)?;
        let n = round.round_number;

        if round.is_completed {
            return Err(LifecycleError::AlreadyCompleted { round: n }.into());
        }
        if now < round.end_time {
            return Err(LifecycleError::RoundNotEnded {
                round: n,
                remaining_secs: round.remaining_secs(now),
            }
            .into());
        }

        let outcome = self
            .locks
            .with_lock(DRAW_WINNER_LOCK, || self.draw_locked(n))
            .await?;

        outcome.unwrap_or(Ok(DrawOutcome::LockBusy))
    }

    async fn draw_locked(&self, n: u64) -> Result<DrawOutcome> {
        if let Some(tx_hash) = self.store.get(&draw_tx_key(n)).await? {
            return Ok(DrawOutcome::AlreadyDrawn { round: n, tx_hash });
        }

        let receipt = self.ledger.draw_winner(n).await?;
        self.store.set(&draw_tx_key(n), &receipt.tx_hash).await?;
        tracing::info!(round = n, tx_hash = %receipt.tx_hash, "Winner draw requested");
        Ok(DrawOutcome::Drawn {
            round: n,
            tx_hash: receipt.tx_hash,
        })
    }

    /// Manual trigger: poll mentions and validate entries now
    pub async fn sync_entries(&self) -> Result<SyncReport> {
        let sync = self.sync.as_ref().ok_or(LifecycleError::SyncUnavailable)?;
        sync.refresh().await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        self.status_at(unix_now()).await
    }

    pub async fn status_at(&self, now: i64) -> Result<StatusReport> {
        let round = self.current_round().await?;
        let phase = LifecyclePhase::determine(round.as_ref(), now, &self.config);
        let markers = match &round {
            Some(r) => Some(FreezeMarkers::load(self.store.as_ref(), r.round_number).await?),
            None => None,
        };

        Ok(StatusReport {
            now,
            phase,
            remaining_secs: round.as_ref().map(|r| r.remaining_secs(now)),
            round,
            eligible_entries: self.store.count_eligible().await?,
            markers,
        })
    }
}
