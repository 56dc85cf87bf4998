//! Named, crash-safe mutual exclusion
//!
//! A lock name is hashed to a 31-bit key and taken with a non-blocking
//! try-acquire against a session-scoped primitive. On PostgreSQL that is
//! `pg_try_advisory_lock` on a connection held for the whole critical
//! section; when the holder dies its session ends and the server frees the
//! lock.
//!
//! # Example
//!
//! ```ignore
//! let locks = LockManager::new(backend, Duration::from_secs(5));
//! match locks.with_lock("round-creation", || async { create().await }).await? {
//!     Some(result) => result?,
//!     None => tracing::debug!("Another instance is creating the round"),
//! }
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::metrics;

/// Lock failures. Contention is not an error: it is `Ok(false)` / `Ok(None)`.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock store error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Lock connection error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Timed out after {timeout_ms}ms acquiring lock '{name}'")]
    Timeout { name: String, timeout_ms: u64 },
}

impl LockError {
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

/// Stable non-negative key for a lock name
pub fn lock_key(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    i64::from(head & 0x7fff_ffff)
}

/// Store primitive behind [`DistributedLock`]
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Non-blocking attempt; `None` when another session holds `key`
    async fn try_acquire(&self, key: i64) -> Result<Option<Box<dyn LockSession>>, LockError>;
}

/// A held lock. Dropping it without [`LockSession::release`] must still free
/// the lock, the way a terminated database session does.
#[async_trait]
pub trait LockSession: Send + Sync {
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

// ============================================================================
// PostgreSQL advisory locks
// ============================================================================

/// Advisory locks on dedicated pooled connections
#[derive(Clone)]
pub struct PgLockBackend {
    pool: Pool,
}

impl PgLockBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockBackend for PgLockBackend {
    async fn try_acquire(&self, key: i64) -> Result<Option<Box<dyn LockSession>>, LockError> {
        let client = self.pool.get().await?;

        // The session owns the connection before the query is sent. If this
        // future is dropped mid-query, its Drop closes the connection rather
        // than pooling one that may hold the lock.
        let mut session = PgLockSession {
            client: Some(client),
            key,
        };
        let acquired = match &session.client {
            Some(client) => client
                .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
                .await?
                .get::<_, bool>(0),
            None => false,
        };

        if !acquired {
            // Nothing held on this connection, so it can go back to the pool
            drop(session.client.take());
            return Ok(None);
        }
        Ok(Some(Box::new(session)))
    }
}

struct PgLockSession {
    client: Option<Object>,
    key: i64,
}

#[async_trait]
impl LockSession for PgLockSession {
    async fn release(mut self: Box<Self>) -> Result<(), LockError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        match client
            .query_one("SELECT pg_advisory_unlock($1)", &[&self.key])
            .await
        {
            Ok(row) => {
                let released: bool = row.get(0);
                if !released {
                    tracing::warn!(key = self.key, "Advisory lock was not held at release");
                    drop(Object::take(client));
                }
                Ok(())
            }
            Err(e) => {
                // Closing the session frees whatever it still holds
                drop(Object::take(client));
                Err(e.into())
            }
        }
    }
}

impl Drop for PgLockSession {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::debug!(key = self.key, "Dropping lock session without release");
            drop(Object::take(client));
        }
    }
}

// ============================================================================
// In-process backend
// ============================================================================

/// Process-local backend with the same semantics; clones share state
#[derive(Clone, Default)]
pub struct MemoryLockBackend {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: i64) -> bool {
        lock_set(&self.held).contains(&key)
    }
}

fn lock_set(held: &Mutex<HashSet<i64>>) -> MutexGuard<'_, HashSet<i64>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn try_acquire(&self, key: i64) -> Result<Option<Box<dyn LockSession>>, LockError> {
        if !lock_set(&self.held).insert(key) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLockSession {
            held: Arc::clone(&self.held),
            key,
        })))
    }
}

struct MemoryLockSession {
    held: Arc<Mutex<HashSet<i64>>>,
    key: i64,
}

#[async_trait]
impl LockSession for MemoryLockSession {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        // Drop does the work
        Ok(())
    }
}

impl Drop for MemoryLockSession {
    fn drop(&mut self) {
        lock_set(&self.held).remove(&self.key);
    }
}

// ============================================================================
// DistributedLock
// ============================================================================

/// One named lock
pub struct DistributedLock {
    name: String,
    key: i64,
    backend: Arc<dyn LockBackend>,
    session: Option<Box<dyn LockSession>>,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn LockBackend>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: lock_key(&name),
            name,
            backend,
            session: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.session.is_some()
    }

    /// Try once to take the lock. Returns `false` immediately when someone
    /// else holds it; `timeout` bounds the store round-trip only.
    pub async fn acquire(&mut self, timeout: Duration) -> Result<bool, LockError> {
        if self.session.is_some() {
            return Ok(true);
        }

        let attempt = tokio::time::timeout(timeout, self.backend.try_acquire(self.key))
            .await
            .map_err(|_| LockError::Timeout {
                name: self.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        let acquired = attempt.is_some();
        self.session = attempt;
        metrics::record_lock_attempt(&self.name, acquired);

        if acquired {
            tracing::debug!(lock = %self.name, key = self.key, "Lock acquired");
        } else {
            tracing::debug!(lock = %self.name, key = self.key, "Lock busy");
        }
        Ok(acquired)
    }

    /// Release if held. Safe to call any number of times.
    pub async fn release(&mut self) -> Result<(), LockError> {
        match self.session.take() {
            Some(session) => {
                session.release().await?;
                tracing::debug!(lock = %self.name, "Lock released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Acquire `name`, run `f`, release. `None` when the lock was busy.
///
/// If `f` panics or the future is dropped, the held session is dropped with
/// it and the lock is freed.
pub async fn with_lock<F, Fut, T>(
    backend: Arc<dyn LockBackend>,
    name: &str,
    timeout: Duration,
    f: F,
) -> Result<Option<T>, LockError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut lock = DistributedLock::new(backend, name);
    if !lock.acquire(timeout).await? {
        return Ok(None);
    }

    let output = f().await;

    if let Err(e) = lock.release().await {
        tracing::warn!(lock = name, error = %e, "Failed to release lock cleanly");
    }
    Ok(Some(output))
}

/// Shared backend plus default acquire timeout
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(backend: Arc<dyn LockBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Process-local manager, for tests and single-instance runs
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLockBackend::new()), Duration::from_secs(5))
    }

    pub fn lock(&self, name: impl Into<String>) -> DistributedLock {
        DistributedLock::new(Arc::clone(&self.backend), name)
    }

    pub async fn with_lock<F, Fut, T>(&self, name: &str, f: F) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        with_lock(Arc::clone(&self.backend), name, self.timeout, f).await
    }
}
