//! Core data structures shared across the coordination core
//!
//! - [`Entry`] - a pending (owner, token) claim sourced from a mention
//! - [`Round`] - local mirror of a ledger round
//! - [`Mention`] - a social feed post that may carry entries
//! - [`TxReceipt`] / [`LedgerEvent`] - ledger write and log results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pending entry, unique by `(source_id, token_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned identifier
    pub id: i64,

    /// Claimed owner wallet, as written in the source post
    pub wallet: String,

    /// Base token id (never carries the encoding marker bit)
    pub token_id: u128,

    /// Identifier of the mention this entry came from
    pub source_id: String,

    pub created_at: DateTime<Utc>,

    /// Whether ownership and source existence were confirmed
    pub verified: bool,

    /// Round this entry was committed to, if any
    pub pushed_round: Option<u64>,

    pub pushed_tx_hash: Option<String>,

    pub pushed_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Whether the entry has been committed to a round on the ledger
    pub fn is_pushed(&self) -> bool {
        self.pushed_round.is_some()
    }

    /// Whether the entry may appear in the snapshot of `round`
    pub fn eligible_for(&self, round: u64) -> bool {
        self.verified && self.pushed_round.map_or(true, |r| r == round)
    }

    /// Pushed markers are all set or all unset
    pub fn markers_consistent(&self) -> bool {
        let set = [
            self.pushed_round.is_some(),
            self.pushed_tx_hash.is_some(),
            self.pushed_at.is_some(),
        ];
        set.iter().all(|s| *s) || set.iter().all(|s| !*s)
    }
}

/// Entry about to be inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub wallet: String,
    pub token_id: u128,
    pub source_id: String,
}

impl NewEntry {
    pub fn new(wallet: impl Into<String>, token_id: u128, source_id: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            token_id,
            source_id: source_id.into(),
        }
    }
}

/// Round state as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub round_number: u64,

    /// Unix seconds
    pub start_time: i64,

    /// Unix seconds
    pub end_time: i64,

    pub is_active: bool,

    pub is_completed: bool,

    pub winner: Option<String>,

    pub winning_token_id: Option<u128>,

    pub total_entries: u64,
}

impl RoundInfo {
    /// Seconds until the round ends (negative once it has ended)
    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.end_time - now
    }
}

/// Local mirror row of a ledger round
pub type Round = RoundInfo;

/// A post from the social feed mentioning the campaign account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub author_id: Option<String>,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of a confirmed ledger write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(default)]
    pub confirmations: u64,
}

fn default_status() -> bool {
    true
}

/// A decoded ledger event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub name: String,
    pub block_number: u64,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl LedgerEvent {
    /// Round number carried in the `roundId` argument, if any
    pub fn round_id(&self) -> Option<u64> {
        match self.args.get("roundId")? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<String> {
        match self.args.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
