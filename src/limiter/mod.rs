//! Per-resource token buckets for metered external APIs
//!
//! Buckets refill lazily on each consumption attempt; there is no background
//! timer. A call that cannot be covered by the available tokens is never
//! rejected: the bucket goes into debt and the caller is told how long to
//! wait before running, so later callers queue behind it.
//!
//! Buckets are process-local. Any action that would double-count against an
//! external budget must run under a distributed lock so only one process
//! consumes a given resource at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::metrics;

/// Errors raised by the limiter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimiterError {
    /// No bucket registered under this name
    #[error("Unknown rate-limit bucket: {0}")]
    UnknownBucket(String),

    /// Bucket parameters are unusable
    #[error("Invalid bucket '{name}': {reason}")]
    InvalidBucket { name: String, reason: String },
}

/// Outcome of a budget request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    /// Tokens were available; run now
    Immediate,
    /// Tokens were reserved; run after the delay
    After(Duration),
}

impl Grant {
    pub fn delay(&self) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::After(d) => *d,
        }
    }
}

/// A single refillable budget
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Tokens available right now (negative while in debt)
    pub fn available(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }

    /// Reserve `cost` tokens, returning how long the caller must wait
    pub fn consume(&mut self, cost: f64) -> Grant {
        self.refill(Instant::now());

        if self.tokens >= cost {
            self.tokens -= cost;
            return Grant::Immediate;
        }

        let missing = cost - self.tokens;
        let delay_ms = (missing / self.refill_per_sec * 1000.0).ceil().max(1.0) as u64;
        self.tokens -= cost;
        Grant::After(Duration::from_millis(delay_ms))
    }
}

/// Registry of named buckets
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a bucket
    pub fn configure(
        &self,
        name: impl Into<String>,
        capacity: f64,
        refill_per_sec: f64,
    ) -> Result<(), LimiterError> {
        let name = name.into();
        if capacity.is_nan() || capacity <= 0.0 || refill_per_sec.is_nan() || refill_per_sec <= 0.0 {
            return Err(LimiterError::InvalidBucket {
                name,
                reason: "capacity and refill rate must be positive".to_string(),
            });
        }
        self.lock()
            .insert(name, TokenBucket::new(capacity, refill_per_sec));
        Ok(())
    }

    /// Builder-style bucket registration
    pub fn with_bucket(
        self,
        name: impl Into<String>,
        capacity: f64,
        refill_per_sec: f64,
    ) -> Result<Self, LimiterError> {
        self.configure(name, capacity, refill_per_sec)?;
        Ok(self)
    }

    /// Reserve `cost` tokens from `bucket`
    pub fn budget(&self, bucket: &str, cost: f64) -> Result<Grant, LimiterError> {
        let mut buckets = self.lock();
        let entry = buckets
            .get_mut(bucket)
            .ok_or_else(|| LimiterError::UnknownBucket(bucket.to_string()))?;
        Ok(entry.consume(cost))
    }

    /// Tokens currently available in `bucket`
    pub fn available(&self, bucket: &str) -> Result<f64, LimiterError> {
        let mut buckets = self.lock();
        buckets
            .get_mut(bucket)
            .map(TokenBucket::available)
            .ok_or_else(|| LimiterError::UnknownBucket(bucket.to_string()))
    }

    /// Wait for budget, then run `action`
    pub async fn run<F, Fut, T>(&self, bucket: &str, cost: f64, action: F) -> Result<T, LimiterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let grant = self.budget(bucket, cost)?;
        if let Grant::After(delay) = grant {
            tracing::debug!(
                bucket = bucket,
                cost = cost,
                delay_ms = delay.as_millis() as u64,
                "Budget exhausted, deferring call"
            );
            metrics::record_limiter_deferral(bucket, delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
        Ok(action().await)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TokenBucket>> {
        // A poisoned map still holds valid buckets
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_immediate_grant_within_capacity() {
        let limiter = RateLimiter::new().with_bucket("api", 3.0, 1.0).unwrap();

        assert_eq!(limiter.budget("api", 1.0).unwrap(), Grant::Immediate);
        assert_eq!(limiter.budget("api", 2.0).unwrap(), Grant::Immediate);
        assert!(limiter.available("api").unwrap().abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_grant_delay() {
        let limiter = RateLimiter::new().with_bucket("api", 2.0, 0.5).unwrap();
        limiter.budget("api", 2.0).unwrap();

        // One missing token at 0.5 tokens/s is two seconds away
        assert_eq!(
            limiter.budget("api", 1.0).unwrap(),
            Grant::After(Duration::from_secs(2))
        );
        // The next caller queues behind the debt
        assert_eq!(
            limiter.budget("api", 1.0).unwrap(),
            Grant::After(Duration::from_secs(4))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_after_draining() {
        let limiter = RateLimiter::new().with_bucket("api", 5.0, 2.0).unwrap();
        limiter.budget("api", 5.0).unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;

        let available = limiter.available("api").unwrap();
        assert!((available - 1.0).abs() < 1e-6, "available = {available}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_capacity() {
        let limiter = RateLimiter::new().with_bucket("api", 4.0, 10.0).unwrap();
        limiter.budget("api", 1.0).unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;

        assert!((limiter.available("api").unwrap() - 4.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_defers_but_never_rejects() {
        let limiter = RateLimiter::new().with_bucket("api", 1.0, 1.0).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        for _ in 0..3 {
            let calls = calls.clone();
            limiter
                .run("api", 1.0, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_bucket() {
        let limiter = RateLimiter::new();
        assert_eq!(
            limiter.budget("missing", 1.0),
            Err(LimiterError::UnknownBucket("missing".to_string()))
        );
    }

    #[test]
    fn test_invalid_bucket_rejected() {
        let limiter = RateLimiter::new();
        assert!(limiter.configure("zero", 0.0, 1.0).is_err());
        assert!(limiter.configure("rate", 1.0, 0.0).is_err());
    }
}
