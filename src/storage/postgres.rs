//! PostgreSQL backend for the state and entry stores
//!
//! Tables:
//! - `app_state` - key/value upserts
//! - `entries` - pending entries, unique by `(source_id, token_id)`, with a
//!   CHECK keeping the three pushed columns all-null or all-set
//! - `rounds` - mirror of ledger rounds
//!
//! Token ids are stored as decimal TEXT since they exceed BIGINT.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};

use crate::models::{Entry, NewEntry, Round};

use super::{EntryStore, StateStore, StorageError, StorageResult};

/// Connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Time to wait for a pooled connection
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/roundkeeper".to_string(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }
}

/// Build a connection pool; connections are opened lazily
pub fn create_pool(config: &StoreConfig) -> StorageResult<Pool> {
    let mut pool_config = PoolConfig::new();
    pool_config.url = Some(config.database_url.clone());
    pool_config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    let mut pool_settings = deadpool_postgres::PoolConfig::new(config.pool_size.max(1));
    pool_settings.timeouts.wait = Some(config.connect_timeout);
    pool_settings.timeouts.create = Some(config.connect_timeout);
    pool_config.pool = Some(pool_settings);

    Ok(pool_config.create_pool(Some(Runtime::Tokio1), NoTls)?)
}

/// Store backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create the pool and verify connectivity
    pub async fn connect(config: &StoreConfig) -> StorageResult<Self> {
        let pool = create_pool(config)?;

        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;

        Ok(Self { pool })
    }

    /// Shared pool, also used by the advisory-lock backend
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create tables and indexes if missing
    pub async fn init_schema(&self) -> StorageResult<()> {
        let client = self.pool.get().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS app_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE TABLE IF NOT EXISTS entries (
                    id BIGSERIAL PRIMARY KEY,
                    wallet TEXT NOT NULL,
                    token_id TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    verified BOOLEAN NOT NULL DEFAULT FALSE,
                    pushed_round BIGINT,
                    pushed_tx_hash TEXT,
                    pushed_at TIMESTAMPTZ,
                    UNIQUE (source_id, token_id),
                    CONSTRAINT entries_pushed_markers CHECK (
                        (pushed_round IS NULL AND pushed_tx_hash IS NULL AND pushed_at IS NULL)
                        OR (pushed_round IS NOT NULL AND pushed_tx_hash IS NOT NULL AND pushed_at IS NOT NULL)
                    )
                );

                CREATE INDEX IF NOT EXISTS idx_entries_unpushed
                    ON entries(verified) WHERE pushed_round IS NULL;

                CREATE INDEX IF NOT EXISTS idx_entries_pushed_round
                    ON entries(pushed_round);

                CREATE TABLE IF NOT EXISTS rounds (
                    round_number BIGINT PRIMARY KEY,
                    start_time BIGINT NOT NULL,
                    end_time BIGINT NOT NULL,
                    is_active BOOLEAN NOT NULL,
                    is_completed BOOLEAN NOT NULL,
                    winner TEXT,
                    winning_token_id TEXT,
                    total_entries BIGINT NOT NULL DEFAULT 0,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                "#,
            )
            .await?;

        tracing::info!("Database schema initialized");
        Ok(())
    }

    async fn query_entries(&self, sql: &str, round: Option<i64>) -> StorageResult<Vec<Entry>> {
        let client = self.pool.get().await?;
        let rows = match round {
            Some(r) => client.query(sql, &[&r]).await?,
            None => client.query(sql, &[]).await?,
        };
        rows.iter().map(entry_from_row).collect()
    }
}

const ENTRY_COLUMNS: &str = "id, wallet, token_id, source_id, created_at, verified, \
                             pushed_round, pushed_tx_hash, pushed_at";

fn entry_from_row(row: &Row) -> StorageResult<Entry> {
    let id: i64 = row.get("id");
    let raw_token: String = row.get("token_id");
    let token_id = raw_token
        .parse::<u128>()
        .map_err(|e| StorageError::corrupt(format!("entries.{id}.token_id"), e.to_string()))?;
    let pushed_round: Option<i64> = row.get("pushed_round");

    Ok(Entry {
        id,
        wallet: row.get("wallet"),
        token_id,
        source_id: row.get("source_id"),
        created_at: row.get("created_at"),
        verified: row.get("verified"),
        pushed_round: pushed_round.map(|r| r as u64),
        pushed_tx_hash: row.get("pushed_tx_hash"),
        pushed_at: row.get("pushed_at"),
    })
}

fn round_from_row(row: &Row) -> StorageResult<Round> {
    let round_number: i64 = row.get("round_number");
    let winning_token_id = row
        .get::<_, Option<String>>("winning_token_id")
        .map(|raw| {
            raw.parse::<u128>().map_err(|e| {
                StorageError::corrupt(
                    format!("rounds.{round_number}.winning_token_id"),
                    e.to_string(),
                )
            })
        })
        .transpose()?;
    let total_entries: i64 = row.get("total_entries");

    Ok(Round {
        round_number: round_number as u64,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        is_active: row.get("is_active"),
        is_completed: row.get("is_completed"),
        winner: row.get("winner"),
        winning_token_id,
        total_entries: total_entries as u64,
    })
}

#[async_trait]
impl StateStore for PgStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT value FROM app_state WHERE key = $1", &[&key])
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO app_state (key, value, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, updated_at = NOW()
                "#,
                &[&key, &value],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EntryStore for PgStore {
    async fn insert_entry(&self, entry: &NewEntry) -> StorageResult<bool> {
        let client = self.pool.get().await?;
        let token_id = entry.token_id.to_string();
        let inserted = client
            .execute(
                r#"
                INSERT INTO entries (wallet, token_id, source_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (source_id, token_id) DO NOTHING
                "#,
                &[&entry.wallet, &token_id, &entry.source_id],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn unpushed_entries(&self) -> StorageResult<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE pushed_round IS NULL ORDER BY id"
        );
        self.query_entries(&sql, None).await
    }

    async fn count_eligible(&self) -> StorageResult<u64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM entries WHERE verified AND pushed_round IS NULL",
                &[],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    async fn entries_for_round(&self, round: u64) -> StorageResult<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries \
             WHERE verified AND (pushed_round IS NULL OR pushed_round = $1) ORDER BY id"
        );
        self.query_entries(&sql, Some(round as i64)).await
    }

    async fn set_verified(&self, entry_id: i64, verified: bool) -> StorageResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE entries SET verified = $2 WHERE id = $1 AND pushed_round IS NULL",
                &[&entry_id, &verified],
            )
            .await?;
        Ok(())
    }

    async fn mark_pushed(
        &self,
        entry_ids: &[i64],
        round: u64,
        tx_hash: &str,
        pushed_at: DateTime<Utc>,
    ) -> StorageResult<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let client = self.pool.get().await?;
        let ids = entry_ids.to_vec();
        let round = round as i64;
        let updated = client
            .execute(
                r#"
                UPDATE entries
                SET pushed_round = $2, pushed_tx_hash = $3, pushed_at = $4
                WHERE id = ANY($1) AND pushed_round IS NULL
                "#,
                &[&ids, &round, &tx_hash, &pushed_at],
            )
            .await?;
        Ok(updated)
    }

    async fn purge_source(&self, source_id: &str) -> StorageResult<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM entries WHERE source_id = $1", &[&source_id])
            .await?;
        Ok(deleted)
    }

    async fn upsert_round(&self, round: &Round) -> StorageResult<()> {
        let client = self.pool.get().await?;
        let number = round.round_number as i64;
        let winning = round.winning_token_id.map(|t| t.to_string());
        let total = round.total_entries as i64;
        client
            .execute(
                r#"
                INSERT INTO rounds (round_number, start_time, end_time, is_active,
                                    is_completed, winner, winning_token_id, total_entries)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (round_number) DO UPDATE SET
                    start_time = EXCLUDED.start_time,
                    end_time = EXCLUDED.end_time,
                    is_active = EXCLUDED.is_active,
                    is_completed = EXCLUDED.is_completed,
                    winner = EXCLUDED.winner,
                    winning_token_id = EXCLUDED.winning_token_id,
                    total_entries = EXCLUDED.total_entries,
                    updated_at = NOW()
                "#,
                &[
                    &number,
                    &round.start_time,
                    &round.end_time,
                    &round.is_active,
                    &round.is_completed,
                    &round.winner,
                    &winning,
                    &total,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_round(&self, round_number: u64) -> StorageResult<Option<Round>> {
        let client = self.pool.get().await?;
        let number = round_number as i64;
        let row = client
            .query_opt(
                "SELECT round_number, start_time, end_time, is_active, is_completed, \
                 winner, winning_token_id, total_entries FROM rounds WHERE round_number = $1",
                &[&number],
            )
            .await?;
        row.as_ref().map(round_from_row).transpose()
    }
}
