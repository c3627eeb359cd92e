use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Episode, PromptTemplate, PromptVars};

/// Completion service. Turns a fixed template plus variables into text.
///
/// The return value is treated as opaque text by every step.
pub trait CompletionService: Send + Sync + 'static {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Semantic memory: facts and preferences retrievable by similarity.
pub trait SemanticStore: Send + Sync + 'static {
    fn add_fact(&self, text: &str, metadata: serde_json::Value) -> BoxFuture<'_, Result<()>>;

    /// Most relevant first.
    fn query_facts(&self, text: &str, k: usize) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Episodic memory: past action sequences and their outcomes.
pub trait EpisodicStore: Send + Sync + 'static {
    fn add_episode(&self, episode: Episode) -> BoxFuture<'_, Result<()>>;

    /// Most similar first.
    fn query_similar_episodes(&self, text: &str, k: usize) -> BoxFuture<'_, Result<Vec<Episode>>>;
}

/// Long-term context store of compressed summaries keyed by the context they summarize.
pub trait ContextStore: Send + Sync + 'static {
    fn save(&self, context: &str, summary: &str) -> BoxFuture<'_, Result<()>>;

    /// Ranked relevant history concatenated into one block of text.
    fn retrieve_relevant(&self, query: &str, k: usize) -> BoxFuture<'_, Result<String>>;
}
