//! Configuration management for roundkeeper
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Validation runs once at startup and rejects
//! anything that would make the lifecycle unsafe.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::feed::FeedConfig;
use crate::ledger::{ConfirmationPolicy, LogScanConfig};
use crate::lifecycle::LifecycleConfig;
use crate::rpc::{EndpointConfig, FailoverConfig};
use crate::scheduler::{OverrunPolicy, TaskOptions};
use crate::storage::StoreConfig;
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Ledger gateway configuration
    pub ledger: LedgerConfig,

    /// Social feed configuration
    pub social: SocialConfig,

    /// Round timing
    pub lifecycle: LifecycleConfig,

    /// Background task cadence
    pub scheduler: SchedulerConfig,

    /// Admin API
    pub api: ApiConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub url: String,

    /// Maximum pool size
    pub pool_size: usize,

    pub connect_timeout_secs: u64,

    /// Bound on one lock round-trip
    pub lock_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: 10,
            connect_timeout_secs: 10,
            lock_timeout_ms: 5_000,
        }
    }
}

/// Ledger gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ranked gateway endpoints
    pub endpoints: Vec<EndpointConfig>,

    /// Budget for endpoints configured without one
    pub default_max_requests_per_window: u32,

    /// Length of the per-endpoint request window
    pub window_secs: u64,

    /// Per-attempt timeout
    pub call_timeout_ms: u64,

    /// Extra passes over the endpoint list
    pub max_passes: u32,

    pub pass_base_delay_ms: u64,

    pub pass_max_delay_ms: u64,

    /// Blocks to wait for after a write
    pub confirmations: u64,

    pub confirmation_poll_ms: u64,

    pub confirmation_timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Completion log scan depth
    pub log_lookback_blocks: u64,

    /// Largest block span per log query
    pub log_max_range: u64,

    pub log_cache_ttl_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            default_max_requests_per_window: 100,
            window_secs: 60,
            call_timeout_ms: 10_000,
            max_passes: 2,
            pass_base_delay_ms: 500,
            pass_max_delay_ms: 8_000,
            confirmations: 2,
            confirmation_poll_ms: 2_000,
            confirmation_timeout_secs: 120,
            connect_timeout_secs: 5,
            log_lookback_blocks: 5_000,
            log_max_range: 1_000,
            log_cache_ttl_secs: 30,
        }
    }
}

/// Social feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialConfig {
    pub base_url: String,

    pub bearer_token: String,

    /// Account whose mentions are polled
    pub user_id: String,

    /// Raw request ceiling per second
    pub requests_per_second: u32,

    pub max_results: u32,

    pub max_pages: u32,

    pub timeout_secs: u64,

    /// `mentions` bucket
    pub mentions_capacity: f64,
    pub mentions_refill_per_sec: f64,

    /// `tweet-lookup` bucket
    pub lookup_capacity: f64,
    pub lookup_refill_per_sec: f64,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".to_string(),
            bearer_token: String::new(),
            user_id: String::new(),
            requests_per_second: 1,
            max_results: 100,
            max_pages: 5,
            timeout_secs: 15,
            // 10 requests per 15 minutes
            mentions_capacity: 10.0,
            mentions_refill_per_sec: 10.0 / 900.0,
            // 300 requests per 15 minutes
            lookup_capacity: 300.0,
            lookup_refill_per_sec: 300.0 / 900.0,
        }
    }
}

/// Background task cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,

    pub validate_interval_ms: u64,

    /// Upper bound of the random delay added to every interval
    pub jitter_ms: u64,

    /// Per-invocation timeout
    pub timeout_ms: u64,

    /// Retries of a failed invocation before waiting for the next tick
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    pub on_overrun: OverrunPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            validate_interval_ms: 300_000,
            jitter_ms: 2_000,
            timeout_ms: 45_000,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            on_overrun: OverrunPolicy::Skip,
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,

    pub bind: String,

    /// Required in `x-api-key` when set
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_string(),
            api_key: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_str(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(None),
    }
}

macro_rules! env_override {
    ($target:expr, $key:literal) => {
        if let Some(value) = env_parse($key)? {
            $target = value;
        }
    };
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.database.url = env_str("ROUNDKEEPER_DATABASE_URL")
            .or_else(|| env_str("DATABASE_URL"))
            .unwrap_or_default();
        env_override!(config.database.pool_size, "ROUNDKEEPER_DATABASE_POOL_SIZE");
        env_override!(config.database.lock_timeout_ms, "ROUNDKEEPER_LOCK_TIMEOUT_MS");

        env_override!(
            config.ledger.default_max_requests_per_window,
            "ROUNDKEEPER_LEDGER_MAX_REQUESTS_PER_WINDOW"
        );
        if let Some(list) = env_str("ROUNDKEEPER_LEDGER_ENDPOINTS") {
            config.ledger.endpoints =
                EndpointConfig::parse_list(&list, config.ledger.default_max_requests_per_window)
                    .map_err(Error::config)?;
        }
        env_override!(config.ledger.window_secs, "ROUNDKEEPER_LEDGER_WINDOW_SECS");
        env_override!(config.ledger.call_timeout_ms, "ROUNDKEEPER_LEDGER_CALL_TIMEOUT_MS");
        env_override!(config.ledger.max_passes, "ROUNDKEEPER_LEDGER_MAX_PASSES");
        env_override!(config.ledger.confirmations, "ROUNDKEEPER_LEDGER_CONFIRMATIONS");
        env_override!(config.ledger.log_lookback_blocks, "ROUNDKEEPER_LEDGER_LOG_LOOKBACK");
        env_override!(config.ledger.log_max_range, "ROUNDKEEPER_LEDGER_LOG_MAX_RANGE");

        if let Some(url) = env_str("ROUNDKEEPER_SOCIAL_BASE_URL") {
            config.social.base_url = url;
        }
        config.social.bearer_token = env_str("ROUNDKEEPER_SOCIAL_BEARER_TOKEN").unwrap_or_default();
        config.social.user_id = env_str("ROUNDKEEPER_SOCIAL_USER_ID").unwrap_or_default();
        env_override!(config.social.requests_per_second, "ROUNDKEEPER_SOCIAL_RPS");
        env_override!(config.social.mentions_capacity, "ROUNDKEEPER_MENTIONS_CAPACITY");
        env_override!(config.social.mentions_refill_per_sec, "ROUNDKEEPER_MENTIONS_REFILL_PER_SEC");
        env_override!(config.social.lookup_capacity, "ROUNDKEEPER_LOOKUP_CAPACITY");
        env_override!(config.social.lookup_refill_per_sec, "ROUNDKEEPER_LOOKUP_REFILL_PER_SEC");

        env_override!(config.lifecycle.round_duration_sec, "ROUNDKEEPER_ROUND_DURATION_SEC");
        env_override!(config.lifecycle.freeze_sec, "ROUNDKEEPER_FREEZE_SEC");
        env_override!(config.lifecycle.safety_sec, "ROUNDKEEPER_SAFETY_SEC");
        env_override!(config.lifecycle.start_skew_sec, "ROUNDKEEPER_START_SKEW_SEC");
        env_override!(config.lifecycle.automation_check_ms, "ROUNDKEEPER_AUTOMATION_CHECK_MS");
        env_override!(config.lifecycle.auto_create, "ROUNDKEEPER_AUTO_CREATE");

        env_override!(config.scheduler.poll_interval_ms, "ROUNDKEEPER_POLL_INTERVAL_MS");
        env_override!(config.scheduler.validate_interval_ms, "ROUNDKEEPER_VALIDATE_INTERVAL_MS");
        env_override!(config.scheduler.jitter_ms, "ROUNDKEEPER_TASK_JITTER_MS");
        env_override!(config.scheduler.timeout_ms, "ROUNDKEEPER_TASK_TIMEOUT_MS");
        env_override!(config.scheduler.max_retries, "ROUNDKEEPER_TASK_MAX_RETRIES");

        env_override!(config.api.enabled, "ROUNDKEEPER_API_ENABLED");
        if let Some(bind) = env_str("ROUNDKEEPER_API_BIND") {
            config.api.bind = bind;
        }
        config.api.api_key = env_str("ROUNDKEEPER_API_KEY");

        if let Some(level) = env_str("ROUNDKEEPER_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = env_str("ROUNDKEEPER_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(format!("Failed to read config file: {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse TOML config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::config("database url is required"));
        }
        if self.database.pool_size == 0 {
            return Err(Error::config("database pool_size must be greater than 0"));
        }

        if self.ledger.endpoints.is_empty() {
            return Err(Error::config("at least one ledger endpoint is required"));
        }
        if let Some(e) = self
            .ledger
            .endpoints
            .iter()
            .find(|e| e.max_requests_per_window == 0)
        {
            return Err(Error::config(format!(
                "endpoint {} has a zero request budget",
                e.url
            )));
        }
        if self.ledger.window_secs == 0 || self.ledger.call_timeout_ms == 0 {
            return Err(Error::config("ledger window and call timeout must be greater than 0"));
        }

        if self.social.bearer_token.is_empty() || self.social.user_id.is_empty() {
            return Err(Error::config("social bearer_token and user_id are required"));
        }
        if self.social.requests_per_second == 0 {
            return Err(Error::config("social requests_per_second must be greater than 0"));
        }
        let buckets = [
            self.social.mentions_capacity,
            self.social.mentions_refill_per_sec,
            self.social.lookup_capacity,
            self.social.lookup_refill_per_sec,
        ];
        if buckets.iter().any(|v| v.is_nan() || *v <= 0.0) {
            return Err(Error::config("bucket capacities and refill rates must be positive"));
        }

        self.validate_lifecycle()?;

        if self.scheduler.poll_interval_ms == 0
            || self.scheduler.validate_interval_ms == 0
            || self.scheduler.timeout_ms == 0
        {
            return Err(Error::config("scheduler intervals and timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Timing rules of the round lifecycle
    pub fn validate_lifecycle(&self) -> Result<()> {
        let lc = &self.lifecycle;
        if lc.round_duration_sec <= 0 || lc.freeze_sec <= 0 || lc.safety_sec < 0 {
            return Err(Error::config(
                "round_duration_sec and freeze_sec must be positive, safety_sec non-negative",
            ));
        }
        if lc.safety_sec >= lc.freeze_sec {
            return Err(Error::config(format!(
                "safety_sec ({}) must be less than freeze_sec ({})",
                lc.safety_sec, lc.freeze_sec
            )));
        }
        if lc.freeze_sec >= lc.round_duration_sec {
            return Err(Error::config("freeze_sec must be shorter than the round"));
        }
        if lc.automation_check_ms == 0 {
            return Err(Error::config("automation_check_ms must be greater than 0"));
        }

        // At least two ticks must land inside the push window
        let limit_ms = (lc.push_window_sec() as u64) * 1000 / 2;
        if lc.automation_check_ms >= limit_ms {
            return Err(Error::config(format!(
                "automation_check_ms ({}) must be below {limit_ms} for a {}s push window",
                lc.automation_check_ms,
                lc.push_window_sec()
            )));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database_url: self.database.url.clone(),
            pool_size: self.database.pool_size,
            connect_timeout: Duration::from_secs(self.database.connect_timeout_secs),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.database.lock_timeout_ms)
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            call_timeout: Duration::from_millis(self.ledger.call_timeout_ms),
            window: Duration::from_secs(self.ledger.window_secs),
            passes: RetryConfig::with_delays(
                self.ledger.max_passes,
                self.ledger.pass_base_delay_ms,
                self.ledger.pass_max_delay_ms,
            ),
        }
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            confirmations: self.ledger.confirmations,
            poll_interval: Duration::from_millis(self.ledger.confirmation_poll_ms),
            timeout: Duration::from_secs(self.ledger.confirmation_timeout_secs),
        }
    }

    pub fn log_scan_config(&self) -> LogScanConfig {
        LogScanConfig {
            lookback_blocks: self.ledger.log_lookback_blocks,
            max_range: self.ledger.log_max_range,
            cache_ttl: Duration::from_secs(self.ledger.log_cache_ttl_secs),
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            base_url: self.social.base_url.clone(),
            bearer_token: self.social.bearer_token.clone(),
            user_id: self.social.user_id.clone(),
            requests_per_second: self.social.requests_per_second,
            max_results: self.social.max_results,
            max_pages: self.social.max_pages,
            timeout: Duration::from_secs(self.social.timeout_secs),
        }
    }

    /// Options for a background task firing every `interval_ms`
    #[must_use]
    pub fn task_options(&self, interval_ms: u64) -> TaskOptions {
        let s = &self.scheduler;
        TaskOptions::new(Duration::from_millis(interval_ms))
            .on_overrun(s.on_overrun)
            .with_jitter(Duration::from_millis(s.jitter_ms))
            .with_timeout(Duration::from_millis(s.timeout_ms))
            .with_retry(RetryConfig::with_delays(
                s.max_retries,
                s.retry_base_delay_ms,
                s.retry_max_delay_ms,
            ))
    }
}
