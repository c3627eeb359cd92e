pub mod providers;
pub mod retry;
pub mod streaming;

use breakdown_core::config::{ModelConfig, RetryConfig};
use breakdown_core::traits::CompletionService;

pub use providers::anthropic::AnthropicCompletion;
pub use providers::openai::OpenAiCompletion;
pub use retry::RetryingCompletion;

/// Create a completion service based on the provider name.
pub fn create_completion(config: &ModelConfig) -> Box<dyn CompletionService> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicCompletion::new(config.clone())),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiCompletion::new(config.clone())),
    }
}

/// Create the primary service wrapped with retries and fallback models.
pub fn create_retrying(primary: &ModelConfig, fallbacks: &[ModelConfig]) -> RetryingCompletion {
    let fallbacks = fallbacks
        .iter()
        .map(|fb| (fb.model_id.clone(), create_completion(fb)))
        .collect();
    RetryingCompletion::new(
        create_completion(primary),
        fallbacks,
        primary.retry.clone().unwrap_or_else(RetryConfig::default),
    )
}
