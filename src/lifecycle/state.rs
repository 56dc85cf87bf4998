//! Lifecycle phases derived from a round and the current time

use serde::{Deserialize, Serialize};

use crate::models::RoundInfo;

use super::LifecycleConfig;

/// Where the current round stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// No round was ever created
    NoRound,
    /// Open and before the freeze window
    Active,
    /// `[end - freeze, end)`
    InFreezeWindow,
    /// Ended on the clock, not yet completed on the ledger
    AwaitingSettlement,
    /// Winner or no-winner recorded
    Completed,
}

impl LifecyclePhase {
    pub fn determine(round: Option<&RoundInfo>, now: i64, config: &LifecycleConfig) -> Self {
        let Some(round) = round.filter(|r| r.round_number > 0) else {
            return Self::NoRound;
        };

        if round.is_completed {
            Self::Completed
        } else if now >= round.end_time {
            Self::AwaitingSettlement
        } else if now >= round.end_time - config.freeze_sec {
            Self::InFreezeWindow
        } else {
            Self::Active
        }
    }

    /// Whether a new round may be opened from this phase
    pub fn allows_new_round(self) -> bool {
        matches!(self, Self::NoRound | Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoRound => "no_round",
            Self::Active => "active",
            Self::InFreezeWindow => "in_freeze_window",
            Self::AwaitingSettlement => "awaiting_settlement",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The push is attempted only in `[end - freeze, end - safety)`; the last
/// `safety` seconds still report as the freeze window but never push.
pub fn freeze_push_allowed(round: &RoundInfo, now: i64, config: &LifecycleConfig) -> bool {
    now >= round.end_time - config.freeze_sec && now < round.end_time - config.safety_sec
}
