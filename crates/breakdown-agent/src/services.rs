use std::sync::Arc;

use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::traits::{CompletionService, ContextStore, EpisodicStore, SemanticStore};

/// External capabilities handed to every step of a run.
///
/// Steps never reach for global clients; whatever a pattern needs must be
/// present here when its graph is built.
#[derive(Clone)]
pub struct Services {
    pub completion: Arc<dyn CompletionService>,
    pub semantic: Option<Arc<dyn SemanticStore>>,
    pub episodic: Option<Arc<dyn EpisodicStore>>,
    pub context_store: Option<Arc<dyn ContextStore>>,
}

impl Services {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            semantic: None,
            episodic: None,
            context_store: None,
        }
    }

    pub fn with_semantic(mut self, store: Arc<dyn SemanticStore>) -> Self {
        self.semantic = Some(store);
        self
    }

    pub fn with_episodic(mut self, store: Arc<dyn EpisodicStore>) -> Self {
        self.episodic = Some(store);
        self
    }

    pub fn with_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.context_store = Some(store);
        self
    }

    /// Use one store for semantic, episodic and long-term context memory.
    pub fn with_memory_store<S>(self, store: Arc<S>) -> Self
    where
        S: SemanticStore + EpisodicStore + ContextStore,
    {
        self.with_semantic(store.clone())
            .with_episodic(store.clone())
            .with_context_store(store)
    }

    pub fn semantic(&self) -> Result<&Arc<dyn SemanticStore>> {
        self.semantic
            .as_ref()
            .ok_or_else(|| BreakdownError::Config("no semantic memory store configured".into()))
    }

    pub fn episodic(&self) -> Result<&Arc<dyn EpisodicStore>> {
        self.episodic
            .as_ref()
            .ok_or_else(|| BreakdownError::Config("no episodic memory store configured".into()))
    }

    pub fn context_store(&self) -> Result<&Arc<dyn ContextStore>> {
        self.context_store
            .as_ref()
            .ok_or_else(|| BreakdownError::Config("no long-term context store configured".into()))
    }
}
