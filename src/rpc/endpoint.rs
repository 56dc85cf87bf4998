//! Ranked RPC endpoints with local per-window request budgets

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Static description of an endpoint, as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,

    /// Lower values are tried first
    pub priority: u32,

    /// Local request budget per window
    pub max_requests_per_window: u32,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, priority: u32, max_requests_per_window: u32) -> Self {
        Self {
            url: url.into(),
            priority,
            max_requests_per_window,
        }
    }

    /// Parse `url|priority|max_requests_per_window`; missing fields take
    /// the position in the list as priority and `default_max` as budget
    pub fn parse(entry: &str, position: usize, default_max: u32) -> Result<Self, String> {
        let mut parts = entry.trim().split('|');
        let url = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("empty endpoint entry at position {position}"))?;

        url::Url::parse(url).map_err(|e| format!("invalid endpoint url '{url}': {e}"))?;

        let priority = match parts.next().map(str::trim) {
            Some(p) if !p.is_empty() => p
                .parse()
                .map_err(|_| format!("invalid priority '{p}' for {url}"))?,
            _ => position as u32,
        };
        let max = match parts.next().map(str::trim) {
            Some(m) if !m.is_empty() => m
                .parse()
                .map_err(|_| format!("invalid request budget '{m}' for {url}"))?,
            _ => default_max,
        };

        Ok(Self::new(url, priority, max))
    }

    /// Parse a comma-separated endpoint list
    pub fn parse_list(list: &str, default_max: u32) -> Result<Vec<Self>, String> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .enumerate()
            .map(|(i, entry)| Self::parse(entry, i, default_max))
            .collect()
    }
}

/// Live state of one endpoint
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub config: EndpointConfig,
    current_requests: u32,
    window_start: Instant,
    exhausted_by_remote: bool,
    successes: u64,
    failures: u64,
}

impl RpcEndpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            current_requests: 0,
            window_start: Instant::now(),
            exhausted_by_remote: false,
            successes: 0,
            failures: 0,
        }
    }

    fn roll_window(&mut self, window: Duration, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= window {
            self.window_start = now;
            self.current_requests = 0;
            self.exhausted_by_remote = false;
        }
    }

    /// Reserve one request from the window budget; false when exhausted
    pub fn try_reserve(&mut self, window: Duration) -> bool {
        self.roll_window(window, Instant::now());
        if self.exhausted_by_remote || self.current_requests >= self.config.max_requests_per_window
        {
            return false;
        }
        self.current_requests += 1;
        true
    }

    /// Treat the rest of the window as spent after a rate-limit response
    pub fn mark_rate_limited(&mut self) {
        self.exhausted_by_remote = true;
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            url: self.config.url.clone(),
            priority: self.config.priority,
            current_requests: self.current_requests,
            rate_limited: self.exhausted_by_remote,
            successes: self.successes,
            failures: self.failures,
        }
    }
}

/// Snapshot of an endpoint's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub url: String,
    pub priority: u32,
    pub current_requests: u32,
    pub rate_limited: bool,
    pub successes: u64,
    pub failures: u64,
}
