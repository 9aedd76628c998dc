//! News search providers and the fallback chain over them.
//!
//! A provider turns a search query into a list of candidate articles.
//! Providers differ in auth requirements and quality; the
//! [`chain::FallbackChain`] tries them in configured order and stops at the
//! first one that returns results.

pub mod chain;
pub mod circuit;
pub mod gdelt;
pub mod newsdata;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use chain::FallbackChain;
pub use circuit::{CircuitWindow, ProviderStats};
pub use gdelt::GdeltProvider;
pub use newsdata::NewsDataProvider;

use crate::models::Provider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Provider requires a credential but none was supplied")]
    MissingCredential,
}

/// A search request handed to one provider
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub limit: usize,
    pub language: Option<String>,
}

impl SearchQuery {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            limit: 20,
            language: None,
        }
    }
}

/// One article returned by a provider
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Raw provider payload, carried through into the queue item
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether calls need an API key injected
    fn requires_credential(&self) -> bool {
        true
    }

    async fn search(
        &self,
        query: &SearchQuery,
        credential: Option<&str>,
    ) -> Result<Vec<SearchHit>, ProviderError>;
}
