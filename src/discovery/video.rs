//! Video platform discovery.
//!
//! The source URL points at a platform listing endpoint that returns JSON
//! of the shape `{"items": [{"id", "title", "url", "description",
//! "published_at"}]}`. The raw item payload rides along in source_data so
//! the rewrite step can mention duration, channel and similar fields.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::discovery::{require_url, Discoverer, DiscoveryError};
use crate::fetcher::{ContentFetcher, FetchOptions, FetchedContent};
use crate::models::{Campaign, DiscoveredItem, SourceConfig, SourceType};

pub struct VideoDiscoverer {
    fetcher: Arc<ContentFetcher>,
}

#[derive(Debug, Deserialize)]
struct VideoListing {
    #[serde(default)]
    items: Vec<VideoEntry>,
}

#[derive(Debug, Deserialize)]
struct VideoEntry {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl VideoDiscoverer {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Discoverer for VideoDiscoverer {
    fn source_type(&self) -> SourceType {
        SourceType::Video
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
                    "video source returned HTML, expected JSON".into(),
                ))
            }
        };

        let listing: VideoListing = serde_json::from_value(value)
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        let items = listing
            .items
            .into_iter()
            .filter_map(|entry| {
                let url = entry.url?;
                let title = entry.title?;
                let mut item = DiscoveredItem::new(url, title, SourceType::Video);
                item.excerpt = entry.description;
                item.published_at = entry
                    .published_at
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                item.source_data = serde_json::Value::Object(entry.rest);
                Some(item)
            })
            .collect();

        Ok(items)
    }
}
