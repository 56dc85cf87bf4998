//! Persistence contracts and their backends
//!
//! - [`StateStore`] - string key/value upserts for idempotency markers,
//!   high-water marks and flags
//! - [`EntryStore`] - row-level operations on pending entries and the local
//!   round mirror
//!
//! [`postgres::PgStore`] implements both against PostgreSQL;
//! [`memory::MemoryStore`] implements both in process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Entry, NewEntry, Round};

pub use memory::MemoryStore;
pub use postgres::{PgStore, StoreConfig};

/// Storage failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Failed to create connection pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A stored value could not be interpreted
    #[error("Corrupt value for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Connection-level failures are usually transient
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Database(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value state with upsert semantics
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;
}

/// Pending entries and the local round mirror
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Insert an entry; returns false when `(source_id, token_id)` already exists
    async fn insert_entry(&self, entry: &NewEntry) -> StorageResult<bool>;

    /// Entries not yet committed to any round
    async fn unpushed_entries(&self) -> StorageResult<Vec<Entry>>;

    /// Verified, un-pushed entries
    async fn count_eligible(&self) -> StorageResult<u64>;

    /// Verified entries that are un-pushed or already pushed to `round`
    async fn entries_for_round(&self, round: u64) -> StorageResult<Vec<Entry>>;

    /// Update the verified flag of an un-pushed entry
    async fn set_verified(&self, entry_id: i64, verified: bool) -> StorageResult<()>;

    /// Set pushed markers on the given entries; entries already pushed are
    /// left untouched. Returns the number of rows updated.
    async fn mark_pushed(
        &self,
        entry_ids: &[i64],
        round: u64,
        tx_hash: &str,
        pushed_at: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Atomically delete every entry sharing `source_id`
    async fn purge_source(&self, source_id: &str) -> StorageResult<u64>;

    async fn upsert_round(&self, round: &Round) -> StorageResult<()>;

    async fn get_round(&self, round_number: u64) -> StorageResult<Option<Round>>;
}

/// Both store contracts behind one trait object
pub trait Store: StateStore + EntryStore {}

impl<T: StateStore + EntryStore> Store for T {}

/// Key of the high-water mark for processed mentions
pub const MENTIONS_SINCE_KEY: &str = "mentions_since_id";
