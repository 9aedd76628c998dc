//! RSS and Atom feed discovery.
//!
//! Feeds in the wild are frequently malformed XML, so items are salvaged
//! with block-level regexes instead of a strict parser: pull out each
//! item/entry block, then pick the link, title and date from inside it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use crate::discovery::{require_url, Discoverer, DiscoveryError};
use crate::fetcher::ContentFetcher;
use crate::models::{Campaign, DiscoveredItem, SourceConfig, SourceType};

lazy_static! {
    static ref ITEM_BLOCK: Regex =
        Regex::new(r"(?is)<(item|entry)[\s>].*?</(item|entry)>").expect("Invalid regex");
    static ref TITLE: Regex =
        Regex::new(r"(?is)<title[^>]*>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</title>")
            .expect("Invalid regex");
    // RSS puts the URL in the element text, Atom in an href attribute
    static ref RSS_LINK: Regex =
        Regex::new(r"(?is)<link[^>]*>\s*(?:<!\[CDATA\[)?\s*(https?://[^<\s\]]+)")
            .expect("Invalid regex");
    static ref ATOM_LINK: Regex =
        Regex::new(r#"(?is)<link[^>]*href\s*=\s*["'](https?://[^"']+)["']"#)
            .expect("Invalid regex");
    static ref PUB_DATE: Regex =
        Regex::new(r"(?is)<(pubDate|published|updated|dc:date)[^>]*>\s*(.*?)\s*</")
            .expect("Invalid regex");
    static ref DESCRIPTION: Regex =
        Regex::new(r"(?is)<(description|summary)[^>]*>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</")
            .expect("Invalid regex");
    static ref TAGS: Regex = Regex::new(r"<[^>]+>").expect("Invalid regex");
}

pub struct FeedDiscoverer {
    fetcher: Arc<ContentFetcher>,
}

impl FeedDiscoverer {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        Self { fetcher }
    }

    fn parse_item(&self, block: &str) -> Option<DiscoveredItem> {
        let url = ATOM_LINK
            .captures(block)
            .or_else(|| RSS_LINK.captures(block))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())?;

        let title = TITLE
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| clean(m.as_str()))
            .filter(|t| !t.is_empty())?;

        let mut item = DiscoveredItem::new(url, title, SourceType::Feed);
        item.excerpt = DESCRIPTION
            .captures(block)
            .and_then(|c| c.get(2))
            .map(|m| clean(m.as_str()))
            .filter(|d| !d.is_empty());
        item.published_at = PUB_DATE
            .captures(block)
            .and_then(|c| c.get(2))
            .and_then(|m| parse_feed_date(m.as_str().trim()));

        Some(item)
    }
}

#[async_trait]
impl Discoverer for FeedDiscoverer {
    fn source_type(&self) -> SourceType {
        SourceType::Feed
    }

    async fn discover(
        &self,
        _campaign: &Campaign,
        source: &SourceConfig,
    ) -> Result<Vec<DiscoveredItem>, DiscoveryError> {
        let url = require_url(source)?;
        let body = self.fetcher.fetch_raw(url).await?;

        if !body.contains("<item") && !body.contains("<entry") {
            return Err(DiscoveryError::Malformed(
                "document has no feed items".into(),
            ));
        }

        let items: Vec<DiscoveredItem> = ITEM_BLOCK
            .find_iter(&body)
            .filter_map(|m| self.parse_item(m.as_str()))
            .collect();

        tracing::debug!(url, count = items.len(), "Parsed feed items");
        Ok(items)
    }
}

fn clean(raw: &str) -> String {
    let stripped = TAGS.replace_all(raw, " ");
    let decoded = html_escape::decode_html_entities(stripped.trim());
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Feeds use RFC 2822 (RSS) or RFC 3339 (Atom) timestamps
fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
