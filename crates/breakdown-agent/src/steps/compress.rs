use futures::future::BoxFuture;
use tracing::{debug, info};

use breakdown_core::error::Result;
use breakdown_core::types::prompt_vars;

use super::templates::{COMPRESS, COMPRESS_WITH_MEMORY};
use crate::graph::{SharedState, Step};
use crate::services::Services;

pub const COMPRESSION_WORD_BUDGET: usize = 200;
pub const STEP_CONTEXT_COMPRESSED: &str = "context_compressed";

/// Cut `text` down to its first `budget` words.
///
/// Text already within budget comes back trimmed but otherwise untouched.
pub fn clamp_words(text: &str, budget: usize) -> String {
    let trimmed = text.trim();
    if trimmed.split_whitespace().count() <= budget {
        return trimmed.to_string();
    }
    trimmed
        .split_whitespace()
        .take(budget)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Summarizes `context` into `compressed_context` and files the summary in
/// the long-term context store under the context it was made from.
///
/// Each run depends only on the current `context`.
pub struct CompressStep {
    memory: bool,
}

impl CompressStep {
    pub fn new() -> Self {
        Self { memory: false }
    }

    pub fn with_memory() -> Self {
        Self { memory: true }
    }
}

impl Default for CompressStep {
    fn default() -> Self {
        Self::new()
    }
}

impl Step for CompressStep {
    fn run<'a>(&'a self, state: &'a SharedState, services: &'a Services) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let store = services.context_store()?;
            let (context, facts, actions) = state.read(|s| {
                let (facts, actions) = s
                    .memory
                    .as_ref()
                    .map(|m| (m.facts_block(), m.current_episode_actions.join(" -> ")))
                    .unwrap_or_default();
                (s.context.clone(), facts, actions)
            });

            let budget = COMPRESSION_WORD_BUDGET.to_string();
            let raw = if self.memory {
                let vars = prompt_vars([
                    ("context", context.as_str()),
                    ("semantic_facts", facts.as_str()),
                    ("episode_actions", actions.as_str()),
                    ("word_budget", budget.as_str()),
                ]);
                services.completion.complete(&COMPRESS_WITH_MEMORY, &vars).await?
            } else {
                let vars = prompt_vars([("context", context.as_str()), ("word_budget", budget.as_str())]);
                services.completion.complete(&COMPRESS, &vars).await?
            };

            let summary = clamp_words(&raw, COMPRESSION_WORD_BUDGET);
            store.save(&context, &summary).await?;
            debug!(
                context_len = context.len(),
                summary_len = summary.len(),
                "Saved compressed context"
            );

            state.update(|s| {
                s.compressed_context = summary;
                s.step = STEP_CONTEXT_COMPRESSED.to_string();
            });
            info!("Context compressed");
            Ok(())
        })
    }
}
