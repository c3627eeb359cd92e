use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use breakdown_core::config::ModelConfig;
use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::traits::CompletionService;
use breakdown_core::types::{PromptTemplate, PromptVars};

use crate::streaming::{collect_text, Chunk, SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiCompletion {
    http: Client,
    config: ModelConfig,
}

impl OpenAiCompletion {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDeltaContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

pub(crate) fn parse_chunk(event: &SseEvent) -> Result<Chunk> {
    if event.data.trim() == "[DONE]" {
        return Ok(Chunk::Done);
    }

    match serde_json::from_str::<StreamChunk>(&event.data) {
        Ok(chunk) => {
            let Some(choice) = chunk.choices.into_iter().next() else {
                return Ok(Chunk::Skip);
            };
            match choice.delta.content {
                Some(text) if !text.is_empty() => Ok(Chunk::Text(text)),
                _ if choice.finish_reason.is_some() => Ok(Chunk::Done),
                _ => Ok(Chunk::Skip),
            }
        }
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            Ok(Chunk::Skip)
        }
    }
}

impl CompletionService for OpenAiCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatRequest {
                model: &self.config.model_id,
                messages: vec![OaiMessage {
                    role: "user",
                    content: template.render(vars),
                }],
                max_tokens: self.config.max_tokens,
                temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
                stream: true,
            };

            let mut req = self.http.post(url).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.bearer_auth(api_key);
            }

            let response = req
                .send()
                .await
                .map_err(|e| BreakdownError::Completion(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(BreakdownError::Completion(format!("HTTP {}: {}", status, body)));
            }

            let text = collect_text(SseStream::new(response.bytes_stream()), parse_chunk).await?;
            debug!(
                kind = template.kind.as_str(),
                chars = text.len(),
                "OpenAI completion finished"
            );
            Ok(text)
        })
    }
}
