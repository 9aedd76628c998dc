//! presswork - Content discovery and rewrite pipeline
//!
//! A campaign-driven pipeline that discovers source content, queues it in a
//! durable deduplicating store, rewrites it through configurable generation
//! backends with credential rotation, and publishes the result.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`discovery`] - Source discoverers and the discovery orchestrator
//! - [`fetcher`] - Rate-limited content fetching with retry and caching
//! - [`providers`] - News search providers behind a fallback chain
//! - [`generation`] - Generation backends and the rotation-aware orchestrator
//! - [`keys`] - Encrypted credential store and rotation strategies
//! - [`processor`] - Queue item processing (claim, fetch, rewrite, publish)
//! - [`publish`] - Publishing targets for finished articles
//! - [`storage`] - Durable queue, campaign and key repositories (SQLite)
//! - [`models`] - Core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use presswork::config::Config;
//! use presswork::storage::{Database, SqliteQueueStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::open(&config.database.path)?;
//!     let queue = SqliteQueueStore::new(db);
//!     let _ = queue;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod generation;
pub mod keys;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod providers;
pub mod publish;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::discovery::{DiscoveryOrchestrator, DiscoveryOutcome};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::fetcher::{ContentFetcher, FetchOptions, FetchedContent};
    pub use crate::generation::{GenerationOrchestrator, GenerationRequest, Operation};
    pub use crate::keys::{KeyStore, RotationStrategy, SecretCipher};
    pub use crate::models::{Campaign, CampaignStatus, Provider, QueueItem, SourceType};
    pub use crate::processor::Processor;
    pub use crate::publish::{MarkdownPublisher, Publisher};
    pub use crate::storage::{Database, QueueStore, SharedQueueStore, SqliteQueueStore};
}

// Direct re-exports for convenience
pub use models::{Campaign, Provider, QueueItem, SourceType};
