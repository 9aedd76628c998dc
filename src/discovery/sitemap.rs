//! XML sitemap discovery.
//!
//! Sitemaps carry no titles, so the page URL doubles as a provisional
//! title; the processor replaces it with the real one after fetching the
//! page. `<lastmod>` feeds the recency-based priority boost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use crate::discovery::{require_url, Discoverer, DiscoveryError};
use crate::fetcher::ContentFetcher;
use crate::models::{Campaign, DiscoveredItem, SourceConfig, SourceType};

lazy_static! {
    static ref URL_BLOCK: Regex = Regex::new(r"(?is)<url>.*?</url>").expect("Invalid regex");
    static ref LOC: Regex =
        Regex::new(r"(?is)<loc>\s*(https?://[^<\s]+)\s*</loc>").expect("Invalid regex");
    static ref LASTMOD: Regex =
        Regex::new(r"(?is)<lastmod>\s*([^<\s]+)\s*</lastmod>").expect("Invalid regex");
}

pub struct SitemapDiscoverer {
    fetcher: Arc<ContentFetcher>,
}

impl SitemapDiscoverer {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Discoverer for SitemapDiscoverer {
    fn source_type(&self) -> SourceType {
        SourceType::Sitemap
    }

    async fn discover(
        &self,
        _campaign: &Campaign,
        source: &SourceConfig,
    ) -> Result<Vec<DiscoveredItem>, DiscoveryError> {
        let url = require_url(source)?;
        let body = self.fetcher.fetch_raw(url).await?;

        if !body.contains("<urlset") && !body.contains("<url>") {
            return Err(DiscoveryError::Malformed(
                "document is not a URL sitemap".into(),
            ));
        }

        let items: Vec<DiscoveredItem> = URL_BLOCK
            .find_iter(&body)
            .filter_map(|m| {
                let block = m.as_str();
                let loc = LOC.captures(block)?.get(1)?.as_str().trim().to_string();
                let mut item = DiscoveredItem::new(loc.clone(), loc, SourceType::Sitemap);
                item.published_at = LASTMOD
                    .captures(block)
                    .and_then(|c| c.get(1))
                    .and_then(|m| parse_lastmod(m.as_str()));
                Some(item)
            })
            .collect();

        tracing::debug!(url, count = items.len(), "Parsed sitemap URLs");
        Ok(items)
    }
}

/// lastmod is a W3C datetime: either a bare date or full RFC 3339
fn parse_lastmod(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}
