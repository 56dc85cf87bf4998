//! Round/freeze lifecycle
//!
//! ```text
//! NoRound ──create──▶ Active ──end-freeze──▶ InFreezeWindow ──end──▶ AwaitingSettlement
//!    ▲                                        (push snapshot once)          │
//!    └────────────────────── Completed ◀────────── completion log ──────────┘
//! ```
//!
//! - [`state`] - phase derivation from round timing
//! - [`snapshot`] - deterministic (owner, token) snapshot
//! - [`markers`] - persisted idempotency markers
//! - [`coordinator`] - the tick-driven state machine

pub mod coordinator;
pub mod markers;
pub mod snapshot;
pub mod state;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use coordinator::{DrawOutcome, RoundCoordinator, StatusReport, TickAction, TickReport};
pub use markers::FreezeMarkers;
pub use snapshot::{build_snapshot, Snapshot, SnapshotEntry};
pub use state::{freeze_push_allowed, LifecyclePhase};

/// Lock taken around round creation
pub const ROUND_CREATION_LOCK: &str = "round-creation";

/// Lock taken around a manual draw
pub const DRAW_WINNER_LOCK: &str = "draw-winner";

/// Lock taken around the freeze step of `round`
pub fn freeze_lock(round: u64) -> String {
    format!("round-{round}-freeze")
}

/// Timing of the round lifecycle, in seconds unless noted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Length of a new round
    pub round_duration_sec: i64,

    /// Freeze window opens this long before the round ends
    pub freeze_sec: i64,

    /// The push must land at least this long before the round ends
    pub safety_sec: i64,

    /// New rounds start this far in the past so they are active at once
    pub start_skew_sec: i64,

    /// Lifecycle tick cadence in milliseconds
    pub automation_check_ms: u64,

    /// Open rounds automatically when the pool is non-empty
    pub auto_create: bool,

    /// Completed rounds remembered for one-time announcements
    pub announced_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            round_duration_sec: 86_400,
            freeze_sec: 180,
            safety_sec: 15,
            start_skew_sec: 60,
            automation_check_ms: 30_000,
            auto_create: true,
            announced_capacity: 64,
        }
    }
}

impl LifecycleConfig {
    /// Effective push window in seconds
    pub fn push_window_sec(&self) -> i64 {
        self.freeze_sec - self.safety_sec
    }
}

/// Lifecycle precondition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("No round exists on the ledger")]
    NoRound,

    #[error("Round {round} ends in {remaining_secs}s")]
    RoundNotEnded { round: u64, remaining_secs: i64 },

    #[error("Round {round} is already completed")]
    AlreadyCompleted { round: u64 },

    #[error("Entry sync is not configured")]
    SyncUnavailable,
}
