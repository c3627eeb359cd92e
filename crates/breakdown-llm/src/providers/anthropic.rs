use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use breakdown_core::config::ModelConfig;
use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::traits::CompletionService;
use breakdown_core::types::{PromptTemplate, PromptVars};

use crate::streaming::{collect_text, Chunk, SseEvent, SseStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicCompletion {
    http: Client,
    config: ModelConfig,
}

impl AnthropicCompletion {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ApiMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    #[serde(default)]
    message: String,
}

pub(crate) fn parse_event(event: &SseEvent) -> Result<Chunk> {
    match serde_json::from_str::<StreamEvent>(&event.data) {
        Ok(StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        }) => Ok(Chunk::Text(text)),
        Ok(StreamEvent::MessageStop) => Ok(Chunk::Done),
        Ok(StreamEvent::Error { error }) => Err(BreakdownError::Stream(error.message)),
        Ok(_) => Ok(Chunk::Skip),
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse Anthropic SSE event");
            Ok(Chunk::Skip)
        }
    }
}

impl CompletionService for AnthropicCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let url = self
                .config
                .base_url
                .as_deref()
                .unwrap_or(ANTHROPIC_API_URL);

            let body = AnthropicRequest {
                model: &self.config.model_id,
                max_tokens: self.config.max_tokens,
                temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
                messages: vec![ApiMessage {
                    role: "user",
                    content: template.render(vars),
                }],
                stream: true,
            };

            let mut req = self
                .http
                .post(url)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("x-api-key", api_key);
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

            let text = collect_text(SseStream::new(response.bytes_stream()), parse_event).await?;
            debug!(
                kind = template.kind.as_str(),
                chars = text.len(),
                "Anthropic completion finished"
            );
            Ok(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_parse_text_delta() {
        let chunk = parse_event(&event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"1. Research"}}"#,
        ))
        .unwrap();
        assert_eq!(chunk, Chunk::Text("1. Research".into()));
    }

    #[test]
    fn test_parse_message_stop() {
        let chunk = parse_event(&event(r#"{"type":"message_stop"}"#)).unwrap();
        assert_eq!(chunk, Chunk::Done);
    }

    #[test]
    fn test_parse_ping_is_skipped() {
        assert_eq!(parse_event(&event(r#"{"type":"ping"}"#)).unwrap(), Chunk::Skip);
    }

    #[test]
    fn test_parse_error_event() {
        let err = parse_event(&event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }
}
