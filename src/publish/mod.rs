//! Publishing targets for finished articles.
//!
//! The pipeline hands a [`FinishedArticle`] to a [`Publisher`] and records
//! the returned post id against the source URL for dedup. The default
//! target renders articles through a Handlebars template and writes
//! markdown files.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;

use crate::models::FinishedArticle;

/// Default article template
const DEFAULT_TEMPLATE: &str = include_str!("../../templates/article.hbs");

/// Destination for finished articles
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one article and return its post id
    async fn publish(&self, article: &FinishedArticle) -> Result<String>;
}

/// Template data for rendering
#[derive(Debug, Serialize)]
struct ArticleTemplateData {
    title: String,
    campaign_id: String,
    source_url: String,
    generated_at: String,
    content_hash: String,
    content: String,
}

impl From<&FinishedArticle> for ArticleTemplateData {
    fn from(article: &FinishedArticle) -> Self {
        Self {
            title: article.title.clone(),
            campaign_id: article.campaign_id.clone(),
            source_url: article.source_url.clone(),
            generated_at: article.generated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            content_hash: article.content_hash(),
            content: article.content.clone(),
        }
    }
}

/// Markdown file publisher with Handlebars template engine
pub struct MarkdownPublisher<'a> {
    handlebars: Handlebars<'a>,
    output_dir: PathBuf,
}

impl<'a> MarkdownPublisher<'a> {
    /// Create a publisher with the default template, writing into
    /// `output_dir` (created if missing)
    pub fn new(output_dir: &Path) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string("article", DEFAULT_TEMPLATE)
            .context("Failed to register default article template")?;

        fs::create_dir_all(output_dir).context("Failed to create output directory")?;

        Ok(Self {
            handlebars,
            output_dir: output_dir.to_path_buf(),
        })
    }

    /// Create with a custom template file
    pub fn with_template(output_dir: &Path, template_path: &Path) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_file("article", template_path)
            .context("Failed to register custom template")?;

        fs::create_dir_all(output_dir).context("Failed to create output directory")?;

        Ok(Self {
            handlebars,
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn render(&self, article: &FinishedArticle) -> Result<String> {
        let data = ArticleTemplateData::from(article);
        self.handlebars
            .render("article", &data)
            .context("Failed to render article template")
    }

    /// Filename: {campaign_id}_{hash12}_{sanitized_title}.md
    fn generate_filename(&self, article: &FinishedArticle) -> String {
        let sanitized_title = sanitize_filename(&article.title, 50);
        let hash = article.content_hash();
        let short_hash = &hash[..12];
        if sanitized_title.is_empty() {
            format!("{}_{}.md", article.campaign_id, short_hash)
        } else {
            format!("{}_{}_{}.md", article.campaign_id, short_hash, sanitized_title)
        }
    }
}

#[async_trait]
impl Publisher for MarkdownPublisher<'_> {
    async fn publish(&self, article: &FinishedArticle) -> Result<String> {
        let markdown = self.render(article)?;
        let filename = self.generate_filename(article);
        let filepath = self.output_dir.join(&filename);

        let mut file = File::create(&filepath)
            .with_context(|| format!("Failed to create file: {}", filepath.display()))?;
        file.write_all(markdown.as_bytes())
            .with_context(|| format!("Failed to write to file: {}", filepath.display()))?;

        tracing::debug!(path = %filepath.display(), "Published article to markdown");
        Ok(filename)
    }
}

/// Sanitize string for use as filename
fn sanitize_filename(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == ' ')
        .take(max_len)
        .collect();

    sanitized.trim().replace(' ', "_").to_lowercase()
}

/// In-memory publisher for tests
pub struct MemoryPublisher {
    published: std::sync::Mutex<Vec<FinishedArticle>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self {
            published: std::sync::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<FinishedArticle> {
        self.published.lock().unwrap().clone()
    }
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, article: &FinishedArticle) -> Result<String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("publisher unavailable");
        }
        let mut published = self.published.lock().unwrap();
        published.push(article.clone());
        Ok(format!("post-{}", published.len()))
    }
}
