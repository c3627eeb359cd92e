use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use breakdown_core::config::RetryConfig;
use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::traits::CompletionService;
use breakdown_core::types::{PromptTemplate, PromptVars};

/// A completion service that retries failed requests and falls back to alternative models.
pub struct RetryingCompletion {
    primary: Box<dyn CompletionService>,
    fallbacks: Vec<(String, Box<dyn CompletionService>)>,
    retry_config: RetryConfig,
}

impl RetryingCompletion {
    pub fn new(
        primary: Box<dyn CompletionService>,
        fallbacks: Vec<(String, Box<dyn CompletionService>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &BreakdownError) -> bool {
    match e {
        BreakdownError::Completion(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("529")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        BreakdownError::Stream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl CompletionService for RetryingCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.complete(template, vars).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                kind = template.kind.as_str(),
                                error = %e,
                                "Retrying completion request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Primary exhausted, try fallbacks
            if !self.fallbacks.is_empty() {
                info!("Primary model exhausted, trying fallback models");
            }
            for (model_id, fallback) in &self.fallbacks {
                match fallback.complete(template, vars).await {
                    Ok(text) => {
                        info!(model = %model_id, "Fell back to alternative model");
                        return Ok(text);
                    }
                    Err(e) => {
                        warn!(model = %model_id, error = %e, "Fallback model also failed");
                    }
                }
            }

            Err(last_err
                .unwrap_or_else(|| BreakdownError::Completion("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakdown_core::types::{prompt_vars, TemplateKind};
    use breakdown_test_utils::{FailingCompletion, FlakyCompletion};

    const TEMPLATE: PromptTemplate = PromptTemplate::new(TemplateKind::Act, "{task}");

    fn fast_retries(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&BreakdownError::Completion("HTTP 503: busy".into())));
        assert!(is_retryable(&BreakdownError::Completion("HTTP 429: slow down".into())));
        assert!(is_retryable(&BreakdownError::Stream("reset".into())));
        assert!(!is_retryable(&BreakdownError::Completion("HTTP 401: bad key".into())));
        assert!(!is_retryable(&BreakdownError::Config("x".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(4800));
        assert!(d >= Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let flaky = FlakyCompletion::new(2, "HTTP 503: busy", "recovered");
        let client = RetryingCompletion::new(Box::new(flaky.clone()), vec![], fast_retries(3));
        let vars = prompt_vars([("task", "x")]);
        let text = client.complete(&TEMPLATE, &vars).await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_goes_to_fallback() {
        let flaky = FlakyCompletion::new(usize::MAX, "HTTP 401: bad key", "never");
        let fallback = FlakyCompletion::new(0, "", "from fallback");
        let client = RetryingCompletion::new(
            Box::new(flaky.clone()),
            vec![("backup-model".into(), Box::new(fallback))],
            fast_retries(3),
        );
        let vars = prompt_vars([("task", "x")]);
        let text = client.complete(&TEMPLATE, &vars).await.unwrap();
        assert_eq!(text, "from fallback");
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_failing_returns_last_error() {
        let client = RetryingCompletion::new(
            Box::new(FailingCompletion::always("HTTP 500: down")),
            vec![],
            fast_retries(1),
        );
        let vars = prompt_vars([("task", "x")]);
        let err = client.complete(&TEMPLATE, &vars).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }
}
