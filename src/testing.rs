//! In-process ledger and feed doubles for unit tests

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::feed::{FeedError, SocialFeed};
use crate::ledger::{LedgerClient, LedgerError};
use crate::models::{LedgerEvent, Mention, RoundInfo, TxReceipt};

#[derive(Default)]
pub struct LedgerState {
    pub rounds: Vec<RoundInfo>,
    pub pushes: Vec<(u64, Vec<String>, Vec<u128>)>,
    pub draws: Vec<u64>,
    pub owners: HashMap<u128, String>,
    pub events: Vec<LedgerEvent>,
    pub head: u64,
    pub fail_push: bool,
    pub tx_counter: u64,
    pub log_queries: usize,
}

/// Ledger kept in memory; every write bumps the head block
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    /// Add a round directly, bypassing `create_round`
    pub fn add_round(&self, start_time: i64, end_time: i64) -> u64 {
        let mut state = self.state();
        let round_number = state.rounds.len() as u64 + 1;
        state.rounds.push(RoundInfo {
            round_number,
            start_time,
            end_time,
            is_active: true,
            is_completed: false,
            winner: None,
            winning_token_id: None,
            total_entries: 0,
        });
        round_number
    }

    pub fn set_owner(&self, token_id: u128, owner: &str) {
        self.state().owners.insert(token_id, owner.to_string());
    }

    /// Emit a log event at the next block
    pub fn emit(&self, name: &str, args: serde_json::Value) {
        let mut state = self.state();
        state.head += 1;
        let block_number = state.head;
        let args = match args {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        state.events.push(LedgerEvent {
            name: name.to_string(),
            block_number,
            tx_hash: None,
            args,
        });
    }

    fn receipt(state: &mut LedgerState) -> TxReceipt {
        state.head += 1;
        state.tx_counter += 1;
        TxReceipt {
            tx_hash: format!("0x{:064x}", state.tx_counter),
            block_number: state.head,
            status: true,
            confirmations: 1,
        }
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn current_round_id(&self) -> Result<u64, LedgerError> {
        Ok(self.state().rounds.len() as u64)
    }

    async fn get_round(&self, round_id: u64) -> Result<RoundInfo, LedgerError> {
        let state = self.state();
        round_id
            .checked_sub(1)
            .and_then(|i| state.rounds.get(i as usize))
            .cloned()
            .ok_or_else(|| LedgerError::Revert {
                name: "RoundNotFound".to_string(),
                args: vec![serde_json::json!(round_id)],
            })
    }

    async fn create_round(&self, start_time: i64, end_time: i64) -> Result<TxReceipt, LedgerError> {
        self.add_round(start_time, end_time);
        Ok(Self::receipt(&mut self.state()))
    }

    async fn push_snapshot(
        &self,
        round_id: u64,
        owners: &[String],
        token_ids: &[u128],
    ) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state();
        if state.fail_push {
            return Err(LedgerError::Rpc(crate::rpc::RpcError::Timeout { timeout_ms: 10 }));
        }
        state
            .pushes
            .push((round_id, owners.to_vec(), token_ids.to_vec()));
        if let Some(round) = state.rounds.get_mut(round_id as usize - 1) {
            round.total_entries = owners.len() as u64;
        }
        Ok(Self::receipt(&mut state))
    }

    async fn draw_winner(&self, round_id: u64) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state();
        state.draws.push(round_id);
        Ok(Self::receipt(&mut state))
    }

    async fn owner_of(&self, token_id: u128) -> Result<Option<String>, LedgerError> {
        Ok(self.state().owners.get(&token_id).cloned())
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.state().head)
    }

    async fn query_logs(
        &self,
        events: &[&str],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let mut state = self.state();
        state.log_queries += 1;
        Ok(state
            .events
            .iter()
            .filter(|e| events.contains(&e.name.as_str()))
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect())
    }
}

/// Feed serving a fixed list of mentions
#[derive(Default)]
pub struct FakeFeed {
    pub mentions: Mutex<Vec<Mention>>,
    pub missing: Mutex<Vec<String>>,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_mention(&self, id: &str, text: &str) {
        self.mentions.lock().unwrap().push(Mention {
            id: id.to_string(),
            author_id: None,
            text: text.to_string(),
            created_at: None,
        });
    }

    pub fn delete(&self, id: &str) {
        self.missing.lock().unwrap().push(id.to_string());
    }
}

#[async_trait]
impl SocialFeed for FakeFeed {
    async fn fetch_mentions_since(&self, since_id: Option<&str>) -> Result<Vec<Mention>, FeedError> {
        let mentions = self.mentions.lock().unwrap();
        Ok(mentions
            .iter()
            .filter(|m| {
                since_id.map_or(true, |s| {
                    crate::feed::client::compare_ids(&m.id, s) == std::cmp::Ordering::Greater
                })
            })
            .cloned()
            .collect())
    }

    async fn tweet_exists(&self, id: &str) -> Result<bool, FeedError> {
        Ok(!self.missing.lock().unwrap().iter().any(|m| m == id))
    }
}
