//! Content generation backends and orchestration.
//!
//! A backend adapts one API family (OpenAI-compatible chat completions,
//! local Ollama) behind the [`GenerationBackend`] trait. The
//! [`orchestrator::GenerationOrchestrator`] owns backend selection per
//! campaign, key rotation, quota accounting and the shared concurrency
//! limiter.

pub mod ollama;
pub mod openai;
pub mod orchestrator;

use async_trait::async_trait;
use thiserror::Error;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use orchestrator::GenerationOrchestrator;

use crate::keys::RotationError;
use crate::models::Provider;

/// What the backend is asked to do with the content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Rewrite the source into an original article
    Rewrite,
    /// Translate into the target language
    Translate,
    /// Smooth machine-sounding text into natural prose
    Humanize,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::Translate => "translate",
            Self::Humanize => "humanize",
        }
    }
}

/// Source material and instructions for one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub title: String,
    pub content: String,
    /// Extra instructions appended to the operation prompt
    pub instructions: Option<String>,
    /// Target language for translate operations
    pub target_language: Option<String>,
}

/// Result of a successful generation call
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub content: String,
    pub metadata: serde_json::Value,
    pub tokens_used: i64,
}

/// Credential and model resolved by the orchestrator for one call
#[derive(Debug, Clone)]
pub struct BackendCall {
    /// Decrypted secret; empty for credential-free backends
    pub credential: String,
    pub model: String,
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Campaign has no generation backend configured")]
    NoConfiguration,

    #[error("No keys available for the configured backend")]
    NoKeysAvailable,

    #[error("All keys for the configured backend are over quota")]
    QuotaExceeded,

    #[error("All keys in the failover chain have failed")]
    AllKeysFailed,

    #[error("Concurrency limit could not be acquired: rate limit exceeded")]
    RateLimitExceeded,

    #[error("Backend does not support {} operations", .0.as_str())]
    UnsupportedOperation(Operation),

    #[error("Backend call failed: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<RotationError> for GenerationError {
    fn from(e: RotationError) -> Self {
        match e {
            RotationError::NoKeysAvailable => Self::NoKeysAvailable,
            RotationError::AllKeysFailed => Self::AllKeysFailed,
        }
    }
}

impl GenerationError {
    /// Transient failures the caller may retry later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded | Self::QuotaExceeded | Self::Http(_) | Self::Backend(_)
        )
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether this backend implements the operation
    fn supports(&self, operation: Operation) -> bool;

    async fn generate(
        &self,
        operation: Operation,
        request: &GenerationRequest,
        call: &BackendCall,
    ) -> Result<GenerationOutput, GenerationError>;
}

/// Shared prompt construction so both backends phrase operations identically
pub(crate) fn build_prompt(operation: Operation, request: &GenerationRequest) -> String {
    let task = match operation {
        Operation::Rewrite => {
            "Rewrite the following source material into an original, well-structured article. \
             Preserve all facts; do not copy sentences verbatim."
                .to_string()
        }
        Operation::Translate => format!(
            "Translate the following article into {}. Preserve tone and structure.",
            request.target_language.as_deref().unwrap_or("English")
        ),
        Operation::Humanize => {
            "Edit the following article so it reads as natural human prose. \
             Vary sentence length and remove formulaic phrasing."
                .to_string()
        }
    };

    let mut prompt = format!("{task}\n\nTitle: {}\n\n{}", request.title, request.content);
    if let Some(instructions) = &request.instructions {
        prompt.push_str("\n\nAdditional instructions: ");
        prompt.push_str(instructions);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            title: "A Title".into(),
            content: "Body text.".into(),
            instructions: Some("Keep it short.".into()),
            target_language: Some("German".into()),
        }
    }

    #[test]
    fn test_prompt_includes_material_and_instructions() {
        let prompt = build_prompt(Operation::Rewrite, &request());
        assert!(prompt.contains("A Title"));
        assert!(prompt.contains("Body text."));
        assert!(prompt.contains("Keep it short."));
    }

    #[test]
    fn test_translate_prompt_names_language() {
        let prompt = build_prompt(Operation::Translate, &request());
        assert!(prompt.contains("German"));

        let mut req = request();
        req.target_language = None;
        let prompt = build_prompt(Operation::Translate, &req);
        assert!(prompt.contains("English"));
    }

    #[test]
    fn test_rotation_error_mapping() {
        assert!(matches!(
            GenerationError::from(RotationError::NoKeysAvailable),
            GenerationError::NoKeysAvailable
        ));
        assert!(matches!(
            GenerationError::from(RotationError::AllKeysFailed),
            GenerationError::AllKeysFailed
        ));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(GenerationError::RateLimitExceeded.is_recoverable());
        assert!(GenerationError::QuotaExceeded.is_recoverable());
        assert!(!GenerationError::NoConfiguration.is_recoverable());
        assert!(!GenerationError::UnsupportedOperation(Operation::Translate).is_recoverable());
    }
}
