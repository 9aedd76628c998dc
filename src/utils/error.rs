//! Error types for fetching and content extraction
//!
//! These are the leaf error types of the pipeline; higher layers wrap them
//! through the unified [`crate::error::Error`] enum.

use thiserror::Error;

/// Errors that can occur while fetching a URL
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-retryable server response
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded")]
    RetriesExhausted,

    /// Response declared a content type the fetcher cannot handle
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Response body was empty
    #[error("Empty response body")]
    EmptyResponse,

    /// Response body could not be decoded as the declared type
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Transient failures worth retrying at a higher layer
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Timeout | Self::RetriesExhausted | Self::ServerError(_)
        )
    }
}

/// Errors that can occur during metadata extraction
#[derive(Error, Debug)]
pub enum ParseError {
    /// No title could be extracted from the document
    #[error("Title not found in document")]
    TitleNotFound,

    /// No usable body text in the document
    #[error("Content not found in document")]
    ContentNotFound,

    /// Invalid URL format
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_recoverable() {
        assert!(FetchError::Timeout.is_recoverable());
        assert!(FetchError::RetriesExhausted.is_recoverable());
        assert!(!FetchError::EmptyResponse.is_recoverable());
        assert!(!FetchError::UnsupportedContentType("image/png".into()).is_recoverable());
    }
}
