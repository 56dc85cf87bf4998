//! Common test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use roundkeeper::feed::{FeedError, SocialFeed};
use roundkeeper::ledger::{LedgerClient, LedgerError, LogScanConfig, LogScanner};
use roundkeeper::lifecycle::{LifecycleConfig, RoundCoordinator};
use roundkeeper::lock::LockManager;
use roundkeeper::models::{LedgerEvent, Mention, NewEntry, RoundInfo, TxReceipt};
use roundkeeper::storage::{EntryStore, MemoryStore};

pub const WALLET_A: &str = "0xAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAa";
pub const WALLET_B: &str = "0xbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbB";

#[derive(Default)]
pub struct LedgerState {
    pub rounds: Vec<RoundInfo>,
    pub pushes: Vec<(u64, Vec<String>, Vec<u128>)>,
    pub draws: Vec<u64>,
    pub owners: HashMap<u128, String>,
    pub events: Vec<LedgerEvent>,
    pub head: u64,
    tx_counter: u64,
}

/// In-memory ledger; every write and event advances the head block
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

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

    pub fn emit(&self, name: &str, args: serde_json::Value) {
        let mut state = self.state();
        state.head += 1;
        let block_number = state.head;
        state.events.push(LedgerEvent {
            name: name.to_string(),
            block_number,
            tx_hash: None,
            args: args.as_object().cloned().unwrap_or_default(),
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
            .ok_or_else(|| LedgerError::decode("getRound", format!("no round {round_id}")))
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
        state
            .pushes
            .push((round_id, owners.to_vec(), token_ids.to_vec()));
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
        Ok(self
            .state()
            .events
            .iter()
            .filter(|e| events.contains(&e.name.as_str()))
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect())
    }
}

/// Feed serving a scripted list of mentions
#[derive(Default)]
pub struct FakeFeed {
    mentions: Mutex<Vec<Mention>>,
    deleted: Mutex<Vec<String>>,
    pub fetches: Mutex<Vec<Option<String>>>,
}

impl FakeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mention(&self, id: &str, text: &str) {
        self.mentions.lock().unwrap().push(Mention {
            id: id.to_string(),
            author_id: Some("7".to_string()),
            text: text.to_string(),
            created_at: None,
        });
    }

    pub fn delete(&self, id: &str) {
        self.deleted.lock().unwrap().push(id.to_string());
    }
}

#[async_trait]
impl SocialFeed for FakeFeed {
    async fn fetch_mentions_since(&self, since_id: Option<&str>) -> Result<Vec<Mention>, FeedError> {
        self.fetches
            .lock()
            .unwrap()
            .push(since_id.map(str::to_string));
        let since: Option<u128> = since_id.and_then(|s| s.parse().ok());
        Ok(self
            .mentions
            .lock()
            .unwrap()
            .iter()
            .filter(|m| since.map_or(true, |s| m.id.parse::<u128>().unwrap() > s))
            .cloned()
            .collect())
    }

    async fn tweet_exists(&self, id: &str) -> Result<bool, FeedError> {
        Ok(!self.deleted.lock().unwrap().iter().any(|d| d == id))
    }
}

/// Coordinator over shared doubles
pub fn coordinator(
    ledger: &Arc<FakeLedger>,
    store: &Arc<MemoryStore>,
    locks: &LockManager,
) -> RoundCoordinator {
    RoundCoordinator::new(
        ledger.clone(),
        store.clone(),
        locks.clone(),
        LogScanner::new(LogScanConfig::default()),
        LifecycleConfig::default(),
    )
}

/// Insert an entry and mark it verified; returns its id
pub async fn verified_entry(store: &MemoryStore, wallet: &str, token_id: u128, source: &str) -> i64 {
    assert!(store
        .insert_entry(&NewEntry::new(wallet, token_id, source))
        .await
        .unwrap());
    let id = store
        .all_entries()
        .await
        .into_iter()
        .find(|e| e.source_id == source && e.token_id == token_id)
        .unwrap()
        .id;
    store.set_verified(id, true).await.unwrap();
    id
}
