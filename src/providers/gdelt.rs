//! GDELT document API client.
//!
//! Credential-free provider used as the tail of the fallback chain.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::models::Provider;
use crate::providers::{ProviderError, SearchHit, SearchProvider, SearchQuery};

const DEFAULT_BASE_URL: &str = "https://api.gdeltproject.org";

pub struct GdeltProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GdeltResponse {
    #[serde(default)]
    articles: Vec<GdeltArticle>,
}

#[derive(Debug, Deserialize)]
struct GdeltArticle {
    url: Option<String>,
    title: Option<String>,
    #[serde(rename = "seendate")]
    seen_date: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl GdeltProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at a mock server in tests
    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for GdeltProvider {
    fn provider(&self) -> Provider {
        Provider::Gdelt
    }

    fn requires_credential(&self) -> bool {
        false
    }

    async fn search(
        &self,
        query: &SearchQuery,
        _credential: Option<&str>,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let url = format!("{}/api/v2/doc/doc", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query.query.as_str()),
                ("mode", "artlist"),
                ("format", "json"),
                ("maxrecords", &query.limit.min(250).to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GdeltResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let hits = body
            .articles
            .into_iter()
            .filter_map(|article| {
                let url = article.url?;
                let title = article.title?;
                Some(SearchHit {
                    url,
                    title,
                    excerpt: None,
                    published_at: article.seen_date.as_deref().and_then(parse_seen_date),
                    raw: serde_json::Value::Object(article.rest),
                })
            })
            .take(query.limit)
            .collect();

        Ok(hits)
    }
}

/// GDELT timestamps look like "20260830T090000Z"
fn parse_seen_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%SZ")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .ok()
}
