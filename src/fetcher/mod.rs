//! HTTP content fetcher with rate limiting, retry and caching.
//!
//! All outbound content fetches go through [`ContentFetcher`]: discovery
//! pulls feeds and API endpoints through it, processing pulls article pages.
//! Fetched results are classified by content type into [`FetchedContent`]
//! so callers never touch raw responses.

pub mod metadata;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

pub use metadata::PageMetadata;

use crate::cache::ResponseCache;
use crate::config::FetcherConfig;
use crate::utils::FetchError;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Per-call fetch options
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Probe and populate the response cache
    pub use_cache: bool,
    /// TTL for the cache entry written on success
    pub cache_ttl: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// A fetched response classified by its content type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchedContent {
    Html {
        metadata: PageMetadata,
        text: String,
    },
    Json {
        value: serde_json::Value,
    },
}

pub struct ContentFetcher {
    client: Client,

    /// Shared limiter applied to every outbound request
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    base_delay_ms: u64,

    cache: Option<Arc<dyn ResponseCache>>,
}

impl ContentFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .redirect(Policy::limited(config.max_redirects))
            .build()?;

        let rate = NonZeroU32::new(config.rate_limit).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            max_retries: config.max_retries,
            base_delay_ms: 1000,
            cache: None,
        })
    }

    /// Attach a response cache
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the backoff base delay; mock-server tests use this to keep
    /// retry sequences fast
    pub fn with_base_delay(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Fetch a URL and classify the response by content type
    pub async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchedContent, FetchError> {
        validate_url(url)?;

        if options.use_cache {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get(url).await {
                    tracing::debug!(url, "Fetch cache hit");
                    return Ok(hit);
                }
            }
        }

        let response = self.send_with_retry(url).await?;
        let content = self.classify(response).await?;

        if options.use_cache {
            if let Some(cache) = &self.cache {
                cache.put(url, &content, options.cache_ttl).await;
            }
        }

        Ok(content)
    }

    /// Fetch a URL and return the raw body; used for feed and sitemap XML
    /// which the classifier has no business interpreting
    pub async fn fetch_raw(&self, url: &str) -> Result<String, FetchError> {
        validate_url(url)?;
        let response = self.send_with_retry(url).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyResponse);
        }
        Ok(body)
    }

    /// Send with rate limiting and exponential backoff retry
    async fn send_with_retry(&self, url: &str) -> Result<Response, FetchError> {
        self.rate_limiter.until_ready().await;

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay_ms * 2_u64.pow(attempt - 1);
                tracing::debug!(url, attempt, delay_ms = delay, "Retrying fetch");
                crate::metrics::record_fetch_retry();
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self
                .client
                .get(url)
                .headers(self.build_headers())
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    } else if should_retry(status.as_u16()) {
                        last_error = Some(FetchError::ServerError(status.as_u16()));
                        continue;
                    } else {
                        return Err(FetchError::ServerError(status.as_u16()));
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        last_error = Some(FetchError::Timeout);
                    } else {
                        last_error = Some(FetchError::Http(e));
                    }
                }
            }
        }

        tracing::warn!(url, retries = self.max_retries, error = ?last_error, "Fetch retries exhausted");
        Err(FetchError::RetriesExhausted)
    }

    /// Classify a successful response by its declared content type
    async fn classify(&self, response: Response) -> Result<FetchedContent, FetchError> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyResponse);
        }

        if content_type.contains("text/html") || content_type.contains("application/xhtml") {
            let (metadata, text) =
                metadata::extract(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
            Ok(FetchedContent::Html { metadata, text })
        } else if content_type.contains("application/json") || content_type.contains("text/json") {
            let value =
                serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
            Ok(FetchedContent::Json { value })
        } else {
            Err(FetchError::UnsupportedContentType(content_type))
        }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let user_agent = random_user_agent();
        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.9,*/*;q=0.8",
            ),
        );

        headers
    }
}

/// Retry on transient statuses only. Client errors other than 429 mean the
/// request itself is wrong and repeating it cannot help.
fn should_retry(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn validate_url(url: &str) -> Result<(), FetchError> {
    let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> FetcherConfig {
        FetcherConfig {
            rate_limit: 100,
            max_retries: 2,
            request_timeout_secs: 10,
            max_redirects: 5,
        }
    }

    #[test]
    fn test_should_retry() {
        assert!(should_retry(429));
        assert!(should_retry(500));
        assert!(should_retry(502));
        assert!(should_retry(503));
        assert!(should_retry(504));

        assert!(!should_retry(400));
        assert!(!should_retry(401));
        assert!(!should_retry(403));
        assert!(!should_retry(404));
        assert!(!should_retry(200));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("ftp://example.com/file").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn test_user_agent_rotation() {
        let mut agents = std::collections::HashSet::new();
        for _ in 0..100 {
            let agent = random_user_agent();
            assert!(USER_AGENTS.contains(&agent));
            agents.insert(agent);
        }
        assert!(agents.len() > 1, "User agents should rotate");
    }

    #[test]
    fn test_fetcher_creation() {
        assert!(ContentFetcher::new(&test_config()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let fetcher = ContentFetcher::new(&test_config()).unwrap();
        let result = fetcher.fetch("file:///etc/passwd", &FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[test]
    fn test_fetched_content_serialization_roundtrip() {
        let content = FetchedContent::Html {
            metadata: PageMetadata {
                title: "T".into(),
                ..Default::default()
            },
            text: "body".into(),
        };
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains(r#""kind":"html""#));
        let back: FetchedContent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, FetchedContent::Html { .. }));
    }
}
