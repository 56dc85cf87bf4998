//! HTTP client for a Twitter v2 style API
//!
//! - `GET /2/users/{id}/mentions` with `since_id`, `max_results` and
//!   `pagination_token`
//! - `GET /2/tweets/{id}` for existence checks
//!
//! Requests carry a bearer token and pass a `governor` per-second ceiling
//! first. Budgets across minutes are the token buckets' job, not this one's.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use serde::Deserialize;

use crate::models::Mention;

use super::{FeedError, SocialFeed};

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// API root, e.g. `https://api.twitter.com`
    pub base_url: String,

    pub bearer_token: String,

    /// Account whose mentions are polled
    pub user_id: String,

    /// Raw request ceiling per second
    pub requests_per_second: u32,

    /// Page size (the API accepts 5..=100)
    pub max_results: u32,

    /// Upper bound on pages fetched per poll
    pub max_pages: u32,

    pub timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".to_string(),
            bearer_token: String::new(),
            user_id: String::new(),
            requests_per_second: 1,
            max_results: 100,
            max_pages: 5,
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MentionsPage {
    #[serde(default)]
    data: Vec<TweetData>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    #[serde(default)]
    text: String,
    author_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<TweetData> for Mention {
    fn from(t: TweetData) -> Self {
        Mention {
            id: t.id,
            author_id: t.author_id,
            text: t.text,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    #[serde(default)]
    title: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl ApiProblem {
    fn is_not_found(&self) -> bool {
        self.title.contains("Not Found") || self.kind.ends_with("/resource-not-found")
    }
}

/// [`SocialFeed`] over HTTP
pub struct HttpSocialFeed {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: FeedConfig,
}

impl HttpSocialFeed {
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(config.timeout).gzip(true).build()?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, FeedError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.config.bearer_token)
            .query(query)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(FeedError::RateLimited { retry_after_secs });
        }
        Ok(response)
    }

    async fn fail(response: Response) -> FeedError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        FeedError::Status {
            status,
            body: crate::utils::truncate_text(&body, 200),
        }
    }
}

#[async_trait]
impl SocialFeed for HttpSocialFeed {
    async fn fetch_mentions_since(&self, since_id: Option<&str>) -> Result<Vec<Mention>, FeedError> {
        let path = format!("/2/users/{}/mentions", self.config.user_id);
        let mut mentions = Vec::new();
        let mut next_token: Option<String> = None;

        for page in 0..self.config.max_pages.max(1) {
            let mut query = vec![
                ("max_results", self.config.max_results.clamp(5, 100).to_string()),
                ("tweet.fields", "created_at,author_id".to_string()),
            ];
            if let Some(since) = since_id {
                query.push(("since_id", since.to_string()));
            }
            if let Some(token) = &next_token {
                query.push(("pagination_token", token.clone()));
            }

            let response = self.get(&path, &query).await?;
            if !response.status().is_success() {
                return Err(Self::fail(response).await);
            }
            let body: MentionsPage = response
                .json()
                .await
                .map_err(|e| FeedError::Decode(e.to_string()))?;

            tracing::debug!(page = page, count = body.data.len(), "Fetched mentions page");
            mentions.extend(body.data.into_iter().map(Mention::from));

            match body.meta.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        // The API returns newest first
        mentions.sort_by(|a, b| compare_ids(&a.id, &b.id));
        Ok(mentions)
    }

    async fn tweet_exists(&self, id: &str) -> Result<bool, FeedError> {
        let response = self.get(&format!("/2/tweets/{id}"), &[]).await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(false),
            s if !s.is_success() => return Err(Self::fail(response).await),
            _ => {}
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        if body.data.is_some() {
            return Ok(true);
        }
        if body.errors.iter().any(ApiProblem::is_not_found) {
            return Ok(false);
        }
        Err(FeedError::Decode(format!(
            "lookup of {id} returned neither data nor a not-found error"
        )))
    }
}

/// Numeric comparison of snowflake-style ids, falling back to string order
pub fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_compare_ids_is_numeric() {
        assert_eq!(compare_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_ids("1700000000000000001", "1700000000000000001"), Ordering::Equal);
        assert_eq!(compare_ids("200", "30"), Ordering::Greater);
    }

    #[test]
    fn test_problem_not_found() {
        let p: ApiProblem = serde_json::from_value(serde_json::json!({
            "title": "Not Found Error",
            "type": "https://api.twitter.com/2/problems/resource-not-found"
        }))
        .unwrap();
        assert!(p.is_not_found());
    }

    #[test]
    fn test_page_without_data() {
        let page: MentionsPage =
            serde_json::from_value(serde_json::json!({ "meta": { "result_count": 0 } })).unwrap();
        assert!(page.data.is_empty());
        assert!(page.meta.next_token.is_none());
    }
}
