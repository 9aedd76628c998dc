//! Unified error handling for the presswork crate
//!
//! Domain-specific errors (fetching, generation, discovery, providers) stay in
//! their modules; this module consolidates them into a single [`Error`] enum
//! with an [`ErrorCategory`] classification so callers can pick a handling
//! strategy without matching on every leaf type.

use std::io;
use thiserror::Error;

pub use crate::discovery::DiscoveryError;
pub use crate::generation::GenerationError;
pub use crate::keys::rotation::RotationError;
pub use crate::providers::ProviderError;
pub use crate::utils::error::{FetchError, ParseError};

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit)
    Network,
    /// Parsing and data extraction errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Generation backend and key rotation errors
    Generation,
    /// Configuration and validation errors
    Config,
    /// Discovery orchestration errors
    Discovery,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the presswork crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Metadata extraction errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Generation orchestration errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Discovery orchestration errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Data provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is recoverable (worth retrying on a later cycle)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Parse(_) => false,
            Self::Generation(e) => e.is_recoverable(),
            Self::Discovery(e) => e.is_recoverable(),
            Self::Provider(_) => true,
            Self::Database(_) => false,
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) | Self::Http(_) | Self::Provider(_) => ErrorCategory::Network,
            Self::Parse(_) | Self::Json(_) => ErrorCategory::Parsing,
            Self::Generation(_) => ErrorCategory::Generation,
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
