use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Barrier;

use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::traits::CompletionService;
use breakdown_core::types::{PromptTemplate, PromptVars, TemplateKind};

type Script = dyn Fn(TemplateKind, &PromptVars) -> Result<String> + Send + Sync;

/// Completion driven by a closure over the template kind and variables.
#[derive(Clone)]
pub struct ScriptedCompletion {
    script: Arc<Script>,
}

impl ScriptedCompletion {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(TemplateKind, &PromptVars) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
        }
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        let out = (self.script)(template.kind, vars);
        Box::pin(async move { out })
    }
}

/// Completion that hands its inputs back.
///
/// Decompose returns a fixed breakdown (empty by default, which forces the
/// fallback subtasks), act returns the subtask, merge returns the formatted
/// results, compress returns the context it was given.
#[derive(Clone, Default)]
pub struct EchoCompletion {
    breakdown: String,
    facts: String,
}

impl EchoCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text returned for decomposition requests.
    pub fn with_breakdown(mut self, text: impl Into<String>) -> Self {
        self.breakdown = text.into();
        self
    }

    /// Text returned for fact extraction requests.
    pub fn with_facts(mut self, text: impl Into<String>) -> Self {
        self.facts = text.into();
        self
    }

    pub fn reply(&self, kind: TemplateKind, vars: &PromptVars) -> String {
        let var = |name: &str| vars.get(name).cloned().unwrap_or_default();
        match kind {
            TemplateKind::Decompose => self.breakdown.clone(),
            TemplateKind::Act => var("task"),
            TemplateKind::Merge => var("results"),
            TemplateKind::Compress => var("context"),
            TemplateKind::ExtractFacts => self.facts.clone(),
        }
    }
}

impl CompletionService for EchoCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        let out = self.reply(template.kind, vars);
        Box::pin(async move { Ok(out) })
    }
}

/// Fails the first `fail_times` calls, then replies with fixed text.
#[derive(Clone)]
pub struct FlakyCompletion {
    fail_times: usize,
    message: String,
    reply: String,
    calls: Arc<AtomicUsize>,
}

impl FlakyCompletion {
    pub fn new(fail_times: usize, message: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            fail_times,
            message: message.into(),
            reply: reply.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionService for FlakyCompletion {
    fn complete<'a>(
        &'a self,
        _template: &'a PromptTemplate,
        _vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let out = if n < self.fail_times {
            Err(BreakdownError::Completion(self.message.clone()))
        } else {
            Ok(self.reply.clone())
        };
        Box::pin(async move { out })
    }
}

type Trigger = dyn Fn(TemplateKind, &PromptVars) -> bool + Send + Sync;

/// Echoes like [`EchoCompletion`] but fails the calls a trigger selects.
#[derive(Clone)]
pub struct FailingCompletion {
    trigger: Arc<Trigger>,
    message: String,
    inner: EchoCompletion,
}

impl FailingCompletion {
    pub fn when<F>(trigger: F, message: impl Into<String>) -> Self
    where
        F: Fn(TemplateKind, &PromptVars) -> bool + Send + Sync + 'static,
    {
        Self {
            trigger: Arc::new(trigger),
            message: message.into(),
            inner: EchoCompletion::new(),
        }
    }

    pub fn always(message: impl Into<String>) -> Self {
        Self::when(|_, _| true, message)
    }

    pub fn on_kind(kind: TemplateKind, message: impl Into<String>) -> Self {
        Self::when(move |k, _| k == kind, message)
    }

    /// Fail only the act call made by the given agent id.
    pub fn on_agent(agent_id: &str, message: impl Into<String>) -> Self {
        let agent_id = agent_id.to_string();
        Self::when(
            move |k, vars| {
                k == TemplateKind::Act && vars.get("agent_id").map(String::as_str) == Some(&agent_id)
            },
            message,
        )
    }

    pub fn with_inner(mut self, inner: EchoCompletion) -> Self {
        self.inner = inner;
        self
    }
}

impl CompletionService for FailingCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        let out = if (self.trigger)(template.kind, vars) {
            Err(BreakdownError::Completion(self.message.clone()))
        } else {
            Ok(self.inner.reply(template.kind, vars))
        };
        Box::pin(async move { out })
    }
}

/// Counts calls per template kind and records every rendered variable map.
#[derive(Clone)]
pub struct CountingCompletion {
    inner: Arc<dyn CompletionService>,
    counts: Arc<Mutex<HashMap<TemplateKind, usize>>>,
    seen: Arc<Mutex<Vec<(TemplateKind, PromptVars)>>>,
}

impl CountingCompletion {
    pub fn new(inner: impl CompletionService) -> Self {
        Self {
            inner: Arc::new(inner),
            counts: Arc::new(Mutex::new(HashMap::new())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn count(&self, kind: TemplateKind) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(&kind).copied().unwrap_or(0)
    }

    /// Variable maps of every call of `kind`, in call order.
    pub fn calls(&self, kind: TemplateKind) -> Vec<PromptVars> {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl CompletionService for CountingCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        {
            let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
            *counts.entry(template.kind).or_insert(0) += 1;
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            seen.push((template.kind, vars.clone()));
        }
        self.inner.complete(template, vars)
    }
}

/// Holds every act call at a barrier until `parties` of them are in flight.
///
/// Agents read their inputs before calling the completion service, so this
/// forces every sibling branch to read shared state before any of them
/// writes back.
#[derive(Clone)]
pub struct RendezvousCompletion {
    inner: Arc<dyn CompletionService>,
    barrier: Arc<Barrier>,
}

impl RendezvousCompletion {
    pub fn new(inner: impl CompletionService, parties: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            barrier: Arc::new(Barrier::new(parties)),
        }
    }
}

impl CompletionService for RendezvousCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            if template.kind == TemplateKind::Act {
                self.barrier.wait().await;
            }
            self.inner.complete(template, vars).await
        })
    }
}

/// Sleeps a random interval before every act call to shuffle branch completion order.
#[derive(Clone)]
pub struct JitterCompletion {
    inner: Arc<dyn CompletionService>,
    max_micros: u64,
}

impl JitterCompletion {
    pub fn new(inner: impl CompletionService, max_micros: u64) -> Self {
        Self {
            inner: Arc::new(inner),
            max_micros,
        }
    }
}

impl CompletionService for JitterCompletion {
    fn complete<'a>(
        &'a self,
        template: &'a PromptTemplate,
        vars: &'a PromptVars,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            if template.kind == TemplateKind::Act && self.max_micros > 0 {
                let micros = rand::random::<u64>() % self.max_micros;
                tokio::time::sleep(Duration::from_micros(micros)).await;
            }
            self.inner.complete(template, vars).await
        })
    }
}
