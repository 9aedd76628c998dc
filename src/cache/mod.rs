//! Redis cache for fetched source content.
//!
//! Discovery and processing often touch the same URL within minutes of each
//! other; caching the classified fetch result keeps repeat traffic off the
//! origin. Redis being down is not fatal: construction degrades to no cache
//! and the fetcher just goes to the network every time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::CacheConfig;
use crate::fetcher::FetchedContent;

/// Cache seam used by the fetcher. Implementations swallow their own errors;
/// a failing cache must never fail a fetch.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, url: &str) -> Option<FetchedContent>;
    async fn put(&self, url: &str, content: &FetchedContent, ttl: Duration);
}

/// Hash a URL into a fixed-width cache key component
fn hash_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct RedisCache {
    pool: Pool,
    key_prefix: String,
}

impl RedisCache {
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        // Test connection
        let mut conn = pool.get().await.context("Failed to get Redis connection")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")?;

        tracing::info!(url = %config.url, "Connected to Redis");

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Create a cache instance, returning None if Redis is unavailable
    pub async fn try_new(config: &CacheConfig) -> Option<Self> {
        match Self::new(config).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "Redis cache unavailable, continuing without cache");
                None
            }
        }
    }

    fn fetch_key(&self, url: &str) -> String {
        format!("{}:fetch:{}", self.key_prefix, hash_url(url))
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, url: &str) -> Option<FetchedContent> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "Cache connection failed on get");
                return None;
            }
        };

        let bytes: Option<Vec<u8>> = conn.get(self.fetch_key(url)).await.ok().flatten();
        bytes.and_then(|b| serde_json::from_slice(&b).ok())
    }

    async fn put(&self, url: &str, content: &FetchedContent, ttl: Duration) {
        let bytes = match serde_json::to_vec(content) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "Cache connection failed on put");
                return;
            }
        };

        if let Err(e) = conn
            .set_ex::<_, _, ()>(self.fetch_key(url), bytes, ttl.as_secs())
            .await
        {
            tracing::warn!(error = %e, "Failed to write cache entry");
        }
    }
}

/// In-process cache used in tests and single-shot CLI runs
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, FetchedContent)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, url: &str) -> Option<FetchedContent> {
        let entries = self.entries.lock().await;
        entries.get(url).and_then(|(expires, content)| {
            if Instant::now() < *expires {
                Some(content.clone())
            } else {
                None
            }
        })
    }

    async fn put(&self, url: &str, content: &FetchedContent, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(url.to_string(), (Instant::now() + ttl, content.clone()));
    }
}
