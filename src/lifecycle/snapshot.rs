//! Deterministic snapshot of eligible entries
//!
//! Verified entries are sorted by `(lowercased wallet, numeric token id)` and
//! de-duplicated on that pair, keeping the first occurrence. Token ids are
//! compared in base form, so an id and its encoded twin count as one. The
//! same entry set always yields the same snapshot regardless of input order.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ledger::encoding::{decode, encode};
use crate::models::Entry;

/// One (owner, token) pair of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotEntry {
    /// Lowercased owner wallet
    pub wallet: String,
    /// Base token id
    pub token_id: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
    /// Every store row the snapshot covers, duplicates included
    entry_ids: Vec<i64>,
}

/// Build the snapshot from `entries`; unverified entries are ignored
pub fn build_snapshot(entries: &[Entry]) -> Snapshot {
    let mut rows: Vec<(String, u128, i64)> = entries
        .iter()
        .filter(|e| e.verified)
        .map(|e| (e.wallet.to_lowercase(), decode(e.token_id), e.id))
        .collect();

    // Stable, so equal pairs keep their input order
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut entry_ids: Vec<i64> = rows.iter().map(|r| r.2).collect();
    entry_ids.sort_unstable();

    let mut snapshot: Vec<SnapshotEntry> = Vec::with_capacity(rows.len());
    for (wallet, token_id, _) in rows {
        let duplicate = snapshot
            .last()
            .is_some_and(|last| last.wallet == wallet && last.token_id == token_id);
        if !duplicate {
            snapshot.push(SnapshotEntry { wallet, token_id });
        }
    }

    Snapshot {
        entries: snapshot,
        entry_ids,
    }
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn entry_ids(&self) -> &[i64] {
        &self.entry_ids
    }

    pub fn owners(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.wallet.clone()).collect()
    }

    /// Token ids with the dual-range marker set, ready for submission
    pub fn encoded_token_ids(&self) -> Vec<u128> {
        self.entries.iter().map(|e| encode(e.token_id)).collect()
    }

    /// Hex SHA-256 over `wallet:token_id` lines, for logs and audits
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for e in &self.entries {
            hasher.update(e.wallet.as_bytes());
            hasher.update(b":");
            hasher.update(e.token_id.to_string().as_bytes());
            hasher.update(b"\n");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
