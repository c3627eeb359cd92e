use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use breakdown_core::error::Result;
use breakdown_core::traits::{ContextStore, EpisodicStore, SemanticStore};
use breakdown_core::types::Episode;

#[derive(Default)]
struct Inner {
    facts: Vec<(String, serde_json::Value)>,
    episodes: Vec<Episode>,
    contexts: Vec<(String, String)>,
}

/// Vec-backed semantic, episodic and context stores ranked by word overlap.
#[derive(Clone, Default)]
pub struct InMemoryStores {
    inner: Arc<Mutex<Inner>>,
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn overlap(query: &HashSet<String>, text: &str) -> usize {
    words(text).intersection(query).count()
}

/// Indices of `items` ordered by descending overlap, ties in insertion order.
fn rank<'a, I>(query: &str, items: I, k: usize) -> Vec<usize>
where
    I: Iterator<Item = &'a str>,
{
    let query = words(query);
    let mut scored: Vec<(usize, usize)> = items
        .enumerate()
        .map(|(i, text)| (i, overlap(&query, text)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(k).map(|(i, _)| i).collect()
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn facts(&self) -> Vec<String> {
        self.lock().facts.iter().map(|(f, _)| f.clone()).collect()
    }

    pub fn fact_metadata(&self) -> Vec<serde_json::Value> {
        self.lock().facts.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn episodes(&self) -> Vec<Episode> {
        self.lock().episodes.clone()
    }

    /// `(context, summary)` pairs in save order.
    pub fn saved_contexts(&self) -> Vec<(String, String)> {
        self.lock().contexts.clone()
    }
}

impl SemanticStore for InMemoryStores {
    fn add_fact(&self, text: &str, metadata: serde_json::Value) -> BoxFuture<'_, Result<()>> {
        self.lock().facts.push((text.to_string(), metadata));
        Box::pin(async { Ok(()) })
    }

    fn query_facts(&self, text: &str, k: usize) -> BoxFuture<'_, Result<Vec<String>>> {
        let inner = self.lock();
        let hits = rank(text, inner.facts.iter().map(|(f, _)| f.as_str()), k)
            .into_iter()
            .map(|i| inner.facts[i].0.clone())
            .collect();
        Box::pin(async move { Ok(hits) })
    }
}

impl EpisodicStore for InMemoryStores {
    fn add_episode(&self, episode: Episode) -> BoxFuture<'_, Result<()>> {
        self.lock().episodes.push(episode);
        Box::pin(async { Ok(()) })
    }

    fn query_similar_episodes(&self, text: &str, k: usize) -> BoxFuture<'_, Result<Vec<Episode>>> {
        let inner = self.lock();
        let successful: Vec<&Episode> = inner.episodes.iter().filter(|e| e.success).collect();
        let patterns: Vec<String> = successful.iter().map(|e| e.pattern_text()).collect();
        let hits = rank(text, patterns.iter().map(String::as_str), k)
            .into_iter()
            .map(|i| successful[i].clone())
            .collect();
        Box::pin(async move { Ok(hits) })
    }
}

impl ContextStore for InMemoryStores {
    fn save(&self, context: &str, summary: &str) -> BoxFuture<'_, Result<()>> {
        self.lock()
            .contexts
            .push((context.to_string(), summary.to_string()));
        Box::pin(async { Ok(()) })
    }

    fn retrieve_relevant(&self, query: &str, k: usize) -> BoxFuture<'_, Result<String>> {
        let inner = self.lock();
        let hits: Vec<String> = rank(query, inner.contexts.iter().map(|(_, s)| s.as_str()), k)
            .into_iter()
            .map(|i| inner.contexts[i].1.clone())
            .collect();
        Box::pin(async move { Ok(hits.join("\n")) })
    }
}
