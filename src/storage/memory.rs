//! In-process store with the same contracts as the PostgreSQL backend

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{Entry, NewEntry, Round};

use super::{EntryStore, StateStore, StorageResult};

/// Memory-backed [`StateStore`] + [`EntryStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<HashMap<String, String>>,
    entries: RwLock<BTreeMap<i64, Entry>>,
    rounds: RwLock<BTreeMap<u64, Round>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in insertion order
    pub async fn all_entries(&self) -> Vec<Entry> {
        self.entries.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.state
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn insert_entry(&self, entry: &NewEntry) -> StorageResult<bool> {
        let mut entries = self.entries.write().await;
        let duplicate = entries
            .values()
            .any(|e| e.source_id == entry.source_id && e.token_id == entry.token_id);
        if duplicate {
            return Ok(false);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        entries.insert(
            id,
            Entry {
                id,
                wallet: entry.wallet.clone(),
                token_id: entry.token_id,
                source_id: entry.source_id.clone(),
                created_at: Utc::now(),
                verified: false,
                pushed_round: None,
                pushed_tx_hash: None,
                pushed_at: None,
            },
        );
        Ok(true)
    }

    async fn unpushed_entries(&self) -> StorageResult<Vec<Entry>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_pushed())
            .cloned()
            .collect())
    }

    async fn count_eligible(&self) -> StorageResult<u64> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.verified && !e.is_pushed())
            .count() as u64)
    }

    async fn entries_for_round(&self, round: u64) -> StorageResult<Vec<Entry>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.eligible_for(round))
            .cloned()
            .collect())
    }

    async fn set_verified(&self, entry_id: i64, verified: bool) -> StorageResult<()> {
        if let Some(entry) = self.entries.write().await.get_mut(&entry_id) {
            if !entry.is_pushed() {
                entry.verified = verified;
            }
        }
        Ok(())
    }

    async fn mark_pushed(
        &self,
        entry_ids: &[i64],
        round: u64,
        tx_hash: &str,
        pushed_at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let mut entries = self.entries.write().await;
        let mut updated = 0;
        for id in entry_ids {
            if let Some(entry) = entries.get_mut(id) {
                if entry.is_pushed() {
                    continue;
                }
                entry.pushed_round = Some(round);
                entry.pushed_tx_hash = Some(tx_hash.to_string());
                entry.pushed_at = Some(pushed_at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn purge_source(&self, source_id: &str) -> StorageResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.source_id != source_id);
        Ok((before - entries.len()) as u64)
    }

    async fn upsert_round(&self, round: &Round) -> StorageResult<()> {
        self.rounds
            .write()
            .await
            .insert(round.round_number, round.clone());
        Ok(())
    }

    async fn get_round(&self, round_number: u64) -> StorageResult<Option<Round>> {
        Ok(self.rounds.read().await.get(&round_number).cloned())
    }
}
