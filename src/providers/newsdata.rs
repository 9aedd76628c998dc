//! NewsData latest-news API client.
//!
//! Credentialed provider; the API key arrives per call from the key store
//! and is passed as the `apikey` query parameter.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::models::Provider;
use crate::providers::{ProviderError, SearchHit, SearchProvider, SearchQuery};

const DEFAULT_BASE_URL: &str = "https://newsdata.io";

pub struct NewsDataProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct NewsDataResponse {
    status: String,
    #[serde(default)]
    results: Vec<NewsDataArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsDataArticle {
    link: Option<String>,
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl NewsDataProvider {
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
impl SearchProvider for NewsDataProvider {
    fn provider(&self) -> Provider {
        Provider::NewsData
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credential: Option<&str>,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let apikey = credential.ok_or(ProviderError::MissingCredential)?;

        let url = format!("{}/api/1/latest", self.base_url);
        let mut request = self.client.get(&url).query(&[
            ("apikey", apikey),
            ("q", query.query.as_str()),
            ("size", &query.limit.min(50).to_string()),
        ]);
        if let Some(language) = &query.language {
            request = request.query(&[("language", language.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: NewsDataResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        if body.status != "success" {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: format!("status field was {:?}", body.status),
            });
        }

        let hits = body
            .results
            .into_iter()
            .filter_map(|article| {
                let url = article.link?;
                let title = article.title?;
                Some(SearchHit {
                    url,
                    title,
                    excerpt: article.description,
                    published_at: article.pub_date.as_deref().and_then(parse_pub_date),
                    raw: serde_json::Value::Object(article.rest),
                })
            })
            .take(query.limit)
            .collect();

        Ok(hits)
    }
}

/// NewsData timestamps come as naive "YYYY-MM-DD HH:MM:SS" in UTC
fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response_body() -> serde_json::Value {
        serde_json::json!({
            "status": "success",
            "totalResults": 2,
            "results": [
                {
                    "title": "Rust 1.90 released",
                    "link": "https://example.com/rust-190",
                    "description": "Release notes",
                    "pubDate": "2026-08-30 09:00:00",
                    "source_id": "example"
                },
                {
                    "title": "Untitled",
                    "link": null,
                    "description": null,
                    "pubDate": null
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_search_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/latest"))
            .and(query_param("apikey", "nd-key"))
            .and(query_param("q", "rust"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body()))
            .mount(&server)
            .await;

        let provider = NewsDataProvider::with_base_url(Client::new(), &server.uri());
        let hits = provider
            .search(&SearchQuery::new("rust"), Some("nd-key"))
            .await
            .unwrap();

        // The null-link article is dropped
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.com/rust-190");
        assert_eq!(hits[0].excerpt.as_deref(), Some("Release notes"));
        assert!(hits[0].published_at.is_some());
        assert_eq!(hits[0].raw["source_id"], "example");
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let provider = NewsDataProvider::new(Client::new());
        let result = provider.search(&SearchQuery::new("rust"), None).await;
        assert!(matches!(result, Err(ProviderError::MissingCredential)));
    }

    #[tokio::test]
    async fn test_api_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/latest"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let provider = NewsDataProvider::with_base_url(Client::new(), &server.uri());
        let result = provider
            .search(&SearchQuery::new("rust"), Some("wrong"))
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::Api { status: 401, .. })
        ));
    }

    #[test]
    fn test_parse_pub_date() {
        assert!(parse_pub_date("2026-08-30 09:00:00").is_some());
        assert!(parse_pub_date("2026-08-30T09:00:00Z").is_some());
        assert!(parse_pub_date("yesterday").is_none());
    }
}
