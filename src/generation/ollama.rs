//! Local Ollama backend.
//!
//! Credential-free; useful as a zero-cost rewrite backend when a local
//! model server is running. Translation quality of small local models is
//! not good enough to offer, so only rewrite and humanize are supported.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::generation::{
    build_prompt, BackendCall, GenerationBackend, GenerationError, GenerationOutput,
    GenerationRequest, Operation,
};
use crate::models::Provider;

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

pub struct OllamaBackend {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: i64,
    #[serde(default)]
    eval_count: i64,
}

impl OllamaBackend {
    pub fn new(client: Client, endpoint: &str) -> Self {
        let endpoint = if endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            endpoint
        };
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Check if the Ollama server is reachable
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);
        self.client.get(&url).send().await.is_ok()
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn supports(&self, operation: Operation) -> bool {
        matches!(operation, Operation::Rewrite | Operation::Humanize)
    }

    async fn generate(
        &self,
        operation: Operation,
        request: &GenerationRequest,
        call: &BackendCall,
    ) -> Result<GenerationOutput, GenerationError> {
        if !self.supports(operation) {
            return Err(GenerationError::UnsupportedOperation(operation));
        }

        let body = OllamaRequest {
            model: call.model.clone(),
            prompt: build_prompt(operation, request),
            stream: false,
            options: OllamaOptions {
                temperature: 0.7,
                num_predict: 4096,
            },
        };

        let url = format!("{}/api/generate", self.endpoint);
        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "ollama returned {status}: {detail}"
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(format!("invalid response body: {e}")))?;

        if parsed.response.trim().is_empty() {
            return Err(GenerationError::Backend("empty generation".into()));
        }

        Ok(GenerationOutput {
            content: parsed.response,
            metadata: serde_json::json!({
                "backend": "ollama",
                "model": call.model,
                "operation": operation.as_str(),
            }),
            tokens_used: parsed.prompt_eval_count + parsed.eval_count,
        })
    }
}
