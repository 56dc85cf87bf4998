//! Persisted idempotency markers
//!
//! - `round_{n}_frozen` - the freeze step finished for round `n`
//! - `round_{n}_snapshot_tx` - hash of the snapshot push
//! - `round_{n}_draw_tx` - hash of the manual draw

use serde::Serialize;

use crate::storage::{StateStore, StorageResult};

pub fn frozen_key(round: u64) -> String {
    format!("round_{round}_frozen")
}

pub fn snapshot_tx_key(round: u64) -> String {
    format!("round_{round}_snapshot_tx")
}

pub fn draw_tx_key(round: u64) -> String {
    format!("round_{round}_draw_tx")
}

/// Freeze markers of one round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FreezeMarkers {
    pub frozen: bool,
    pub snapshot_tx: Option<String>,
}

impl FreezeMarkers {
    pub async fn load<S: StateStore + ?Sized>(store: &S, round: u64) -> StorageResult<Self> {
        let frozen = store.get(&frozen_key(round)).await?;
        let snapshot_tx = store.get(&snapshot_tx_key(round)).await?;
        Ok(Self {
            frozen: frozen.as_deref() == Some("true"),
            snapshot_tx: snapshot_tx.filter(|tx| !tx.is_empty()),
        })
    }

    /// Either marker blocks another push
    pub fn is_set(&self) -> bool {
        self.frozen || self.snapshot_tx.is_some()
    }

    /// Record a finished freeze; the hash is written before the flag
    pub async fn persist<S: StateStore + ?Sized>(
        store: &S,
        round: u64,
        snapshot_tx: Option<&str>,
    ) -> StorageResult<()> {
        if let Some(tx) = snapshot_tx {
            store.set(&snapshot_tx_key(round), tx).await?;
        }
        store.set(&frozen_key(round), "true").await
    }
}
