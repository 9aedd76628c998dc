//! Marketplace listing discovery.
//!
//! The source URL points at a marketplace API endpoint returning JSON of
//! the shape `{"listings": [{"url", "title", "summary", "posted_at",
//! ...}]}`. Pricing and seller fields pass through in source_data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::discovery::{require_url, Discoverer, DiscoveryError};
use crate::fetcher::{ContentFetcher, FetchOptions, FetchedContent};
use crate::models::{Campaign, DiscoveredItem, SourceConfig, SourceType};

pub struct MarketplaceDiscoverer {
    fetcher: Arc<ContentFetcher>,
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(default)]
    listings: Vec<Listing>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    url: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    posted_at: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl MarketplaceDiscoverer {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Discoverer for MarketplaceDiscoverer {
    fn source_type(&self) -> SourceType {
        SourceType::Marketplace
    }

    async fn discover(
        &self,
        _campaign: &Campaign,
        source: &SourceConfig,
    ) -> Result<Vec<DiscoveredItem>, DiscoveryError> {
        let url = require_url(source)?;

        let options = FetchOptions {
            use_cache: false,
            ..Default::default()
        };
        let value = match self.fetcher.fetch(url, &options).await? {
            FetchedContent::Json { value } => value,
            FetchedContent::Html { .. } => {
                return Err(DiscoveryError::Malformed(
                    "marketplace source returned HTML, expected JSON".into(),
                ))
            }
        };

        let page: ListingPage = serde_json::from_value(value)
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        let items = page
            .listings
            .into_iter()
            .filter_map(|listing| {
                let url = listing.url?;
                let title = listing.title?;
                let mut item = DiscoveredItem::new(url, title, SourceType::Marketplace);
                item.excerpt = listing.summary;
                item.published_at = listing
                    .posted_at
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                item.source_data = serde_json::Value::Object(listing.rest);
                Some(item)
            })
            .collect();

        Ok(items)
    }
}
