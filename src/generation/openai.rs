//! OpenAI-compatible chat completion backend.
//!
//! Works against api.openai.com and any server speaking the same protocol;
//! the base URL is configurable so tests can point it at a mock server.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::generation::{
    build_prompt, BackendCall, GenerationBackend, GenerationError, GenerationOutput,
    GenerationRequest, Operation,
};
use crate::models::Provider;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiBackend {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: i64,
}

impl OpenAiBackend {
    pub fn new(client: Client, base_url: &str) -> Self {
        let base = if base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            base_url
        };
        Self {
            client,
            base_url: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    async fn generate(
        &self,
        operation: Operation,
        request: &GenerationRequest,
        call: &BackendCall,
    ) -> Result<GenerationOutput, GenerationError> {
        let body = ChatRequest {
            model: call.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: "You are an experienced editor producing publishable articles.".into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: build_prompt(operation, request),
                },
            ],
            temperature: 0.7,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&call.credential)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "chat completion returned {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Backend(format!("invalid response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GenerationError::Backend("response contained no choices".into()))?;

        let tokens_used = parsed.usage.unwrap_or_default().total_tokens;

        Ok(GenerationOutput {
            content,
            metadata: serde_json::json!({
                "backend": "openai",
                "model": parsed.model.unwrap_or_else(|| call.model.clone()),
                "operation": operation.as_str(),
            }),
            tokens_used,
        })
    }
}
