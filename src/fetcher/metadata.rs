//! Page metadata and body text extraction from fetched HTML.
//!
//! Extraction order per field: explicit tag, then Open Graph, then a
//! heuristic fallback. Articles vary wildly in markup quality, so every
//! field except the URL is best-effort.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::utils::ParseError;

// Helper macro to parse selectors safely at startup
macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    static ref TITLE_TAG: Selector = parse_selector!("title");
    static ref OG_TITLE: Selector = parse_selector!(r#"meta[property="og:title"]"#);
    static ref FIRST_H1: Selector = parse_selector!("h1");

    static ref META_DESCRIPTION: Selector = parse_selector!(r#"meta[name="description"]"#);
    static ref OG_DESCRIPTION: Selector = parse_selector!(r#"meta[property="og:description"]"#);

    static ref META_AUTHOR: Selector = parse_selector!(r#"meta[name="author"]"#);
    static ref OG_IMAGE: Selector = parse_selector!(r#"meta[property="og:image"]"#);

    static ref PUBLISHED_TIME: Selector = parse_selector!(r#"meta[property="article:published_time"]"#);
    static ref TIME_DATETIME: Selector = parse_selector!("time[datetime]");
    static ref META_DATE: Selector = parse_selector!(r#"meta[name="date"]"#);

    static ref PARAGRAPHS: Selector = parse_selector!("article p, main p, p");

    static ref WHITESPACE: regex::Regex = regex::Regex::new(r"\s+").expect("Invalid regex");
}

/// Metadata extracted from a fetched HTML page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub image: Option<String>,
}

/// Extract metadata and readable body text from an HTML document.
///
/// Fails only when no title can be found at all; everything else degrades
/// to None or an empty string.
pub fn extract(html: &str) -> Result<(PageMetadata, String), ParseError> {
    let document = Html::parse_document(html);

    let title = extract_title(&document).ok_or(ParseError::TitleNotFound)?;

    let metadata = PageMetadata {
        title,
        description: meta_content(&document, &META_DESCRIPTION)
            .or_else(|| meta_content(&document, &OG_DESCRIPTION)),
        author: meta_content(&document, &META_AUTHOR),
        published_at: extract_published(&document),
        image: meta_content(&document, &OG_IMAGE),
    };

    Ok((metadata, extract_text(&document)))
}

fn extract_title(document: &Html) -> Option<String> {
    // Explicit <title> wins, then Open Graph, then the first heading
    document
        .select(&TITLE_TAG)
        .next()
        .map(|el| el.text().collect::<String>())
        .map(|t| clean_text(&t))
        .filter(|t| !t.is_empty())
        .or_else(|| meta_content(document, &OG_TITLE))
        .or_else(|| {
            document
                .select(&FIRST_H1)
                .next()
                .map(|el| clean_text(&el.text().collect::<String>()))
                .filter(|t| !t.is_empty())
        })
}

fn extract_published(document: &Html) -> Option<DateTime<Utc>> {
    meta_content(document, &PUBLISHED_TIME)
        .or_else(|| {
            document
                .select(&TIME_DATETIME)
                .next()
                .and_then(|el| el.value().attr("datetime"))
                .map(|s| s.to_string())
        })
        .or_else(|| meta_content(document, &META_DATE))
        .and_then(|raw| parse_date(&raw))
}

/// Parse common date formats seen in article markup
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

fn extract_text(document: &Html) -> String {
    let paragraphs: Vec<String> = document
        .select(&PARAGRAPHS)
        .map(|el| clean_text(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();

    paragraphs.join("\n\n")
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(clean_text)
        .filter(|t| !t.is_empty())
}

fn clean_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    WHITESPACE.replace_all(decoded.trim(), " ").to_string()
}
