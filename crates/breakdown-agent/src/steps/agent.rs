use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use breakdown_core::error::Result;
use breakdown_core::types::{prompt_vars, PromptVars};

use super::templates::{
    AGENT_COMPRESSED, AGENT_COMPRESSED_WITH_MEMORY, AGENT_ISOLATED, AGENT_SEQUENTIAL,
    AGENT_SEQUENTIAL_WITH_MEMORY, AGENT_SHARED,
};
use crate::graph::{SharedState, Step};
use crate::services::Services;

/// What an agent sees besides its subtask, and what it writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Subtask only. Never touches `context`.
    Isolated,
    /// Reads `context` up front and writes back the snapshot plus its own
    /// result afterwards, racing any sibling doing the same.
    Shared,
    /// Reads the context built by earlier agents, then appends.
    Sequential,
    /// Reads `compressed_context` and similar history from the context store.
    Compressed,
}

/// Step label written once agent `id` has finished.
pub fn completed_label(agent_id: &str) -> String {
    format!("agent_{}_completed", agent_id)
}

fn context_entry(agent_id: &str, result: &str) -> String {
    format!("\n[Agent {}]: {}", agent_id, result)
}

/// Produces the result for one subtask.
///
/// Agent ids are 1-based and index into `subtasks`. An id with no subtask
/// makes the step a no-op.
pub struct AgentStep {
    agent_id: String,
    mode: AgentMode,
    memory: bool,
    history_k: usize,
}

impl AgentStep {
    pub fn new(agent_id: usize, mode: AgentMode) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            mode,
            memory: false,
            history_k: 5,
        }
    }

    /// Fold retrieved facts and episodes into the prompt and record the action.
    ///
    /// Only the sequential and compressed modes have memory prompts; the flag
    /// is ignored for the parallel modes.
    pub fn with_memory(mut self, memory: bool) -> Self {
        self.memory = memory;
        self
    }

    /// How many history entries a compressed agent pulls from the context store.
    pub fn with_history_k(mut self, k: usize) -> Self {
        self.history_k = k;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    fn uses_memory(&self) -> bool {
        self.memory && matches!(self.mode, AgentMode::Sequential | AgentMode::Compressed)
    }
}

/// Inputs copied out of the shared state before the completion call.
struct Inputs {
    subtask: String,
    context: String,
    compressed_context: String,
    facts: String,
    examples: String,
}

impl AgentStep {
    async fn complete(&self, inputs: &Inputs, services: &Services) -> Result<String> {
        let id = self.agent_id.as_str();
        let task = inputs.subtask.as_str();
        let memory = self.uses_memory();

        let mut vars: PromptVars = prompt_vars([("agent_id", id), ("task", task)]);
        if memory {
            vars.insert("semantic_context".into(), inputs.facts.clone());
            vars.insert("few_shot_examples".into(), inputs.examples.clone());
        }

        let template = match self.mode {
            AgentMode::Isolated => &AGENT_ISOLATED,
            AgentMode::Shared => {
                vars.insert("history".into(), inputs.context.clone());
                &AGENT_SHARED
            }
            AgentMode::Sequential => {
                vars.insert("context".into(), inputs.context.clone());
                if memory {
                    &AGENT_SEQUENTIAL_WITH_MEMORY
                } else {
                    &AGENT_SEQUENTIAL
                }
            }
            AgentMode::Compressed => {
                let relevant = services
                    .context_store()?
                    .retrieve_relevant(task, self.history_k)
                    .await?;
                debug!(agent = id, history_len = relevant.len(), "Retrieved relevant history");
                vars.insert("compressed_context".into(), inputs.compressed_context.clone());
                vars.insert("relevant_context".into(), relevant);
                if memory {
                    &AGENT_COMPRESSED_WITH_MEMORY
                } else {
                    &AGENT_COMPRESSED
                }
            }
        };

        services.completion.complete(template, &vars).await
    }
}

impl Step for AgentStep {
    fn run<'a>(&'a self, state: &'a SharedState, services: &'a Services) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let id = self.agent_id.as_str();
            let inputs = state.read(|s| {
                let subtask = s.subtask_for(id)?.to_string();
                let (facts, examples) = s
                    .memory
                    .as_ref()
                    .map(|m| (m.facts_block(), m.examples_block()))
                    .unwrap_or_default();
                Some(Inputs {
                    subtask,
                    context: s.context.clone(),
                    compressed_context: s.compressed_context.clone(),
                    facts,
                    examples,
                })
            });
            let Some(inputs) = inputs else {
                warn!(agent = id, "No subtask for agent, skipping");
                return Ok(());
            };

            let result = self.complete(&inputs, services).await?;
            info!(agent = id, mode = ?self.mode, result_len = result.len(), "Agent finished");

            let entry = context_entry(id, &result);
            let record_action = self.uses_memory();
            state.update(|s| {
                match self.mode {
                    AgentMode::Isolated => {}
                    // Written from the pre-call snapshot; sibling appends made
                    // in the meantime are overwritten.
                    AgentMode::Shared => s.context = format!("{}{}", inputs.context, entry),
                    AgentMode::Sequential | AgentMode::Compressed => s.context.push_str(&entry),
                }
                if record_action {
                    if let Some(memory) = s.memory.as_mut() {
                        memory
                            .current_episode_actions
                            .push(format!("Agent {}: {}", id, inputs.subtask));
                    }
                }
                s.sub_results.insert(id.to_string(), result);
                s.step = completed_label(id);
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use breakdown_core::state::{MemoryState, TaskState};
    use breakdown_core::traits::ContextStore;
    use breakdown_core::types::TemplateKind;
    use breakdown_test_utils::{CountingCompletion, EchoCompletion, InMemoryStores};

    fn state_with(subtasks: &[&str]) -> SharedState {
        let mut state = TaskState::new("task");
        state.subtasks = subtasks.iter().map(|s| s.to_string()).collect();
        SharedState::new(state)
    }

    fn echo() -> Services {
        Services::new(Arc::new(EchoCompletion::new()))
    }

    #[tokio::test]
    async fn test_isolated_records_result_only() {
        let state = state_with(&["a", "b"]);
        AgentStep::new(2, AgentMode::Isolated)
            .run(&state, &echo())
            .await
            .unwrap();

        let s = state.snapshot();
        assert_eq!(s.sub_results.get("2").map(String::as_str), Some("b"));
        assert!(s.context.is_empty());
        assert_eq!(s.step, "agent_2_completed");
    }

    #[tokio::test]
    async fn test_out_of_range_is_noop() {
        let state = state_with(&["a", "b"]);
        let before = state.snapshot();
        for mode in [AgentMode::Isolated, AgentMode::Shared, AgentMode::Sequential] {
            AgentStep::new(3, mode).run(&state, &echo()).await.unwrap();
        }
        assert_eq!(state.snapshot(), before);
    }

    #[tokio::test]
    async fn test_sequential_sees_previous_agent() {
        let counting = CountingCompletion::new(EchoCompletion::new());
        let services = Services::new(Arc::new(counting.clone()));
        let state = state_with(&["research", "plan"]);

        AgentStep::new(1, AgentMode::Sequential).run(&state, &services).await.unwrap();
        AgentStep::new(2, AgentMode::Sequential).run(&state, &services).await.unwrap();

        let calls = counting.calls(TemplateKind::Act);
        assert_eq!(calls[0].get("context").map(String::as_str), Some(""));
        let seen_by_2 = calls[1].get("context").cloned().unwrap_or_default();
        assert!(seen_by_2.contains("research"));
        assert_eq!(state.snapshot().context, "\n[Agent 1]: research\n[Agent 2]: plan");
    }

    #[tokio::test]
    async fn test_shared_writes_back_snapshot() {
        let state = state_with(&["a", "b"]);
        AgentStep::new(1, AgentMode::Shared).run(&state, &echo()).await.unwrap();
        AgentStep::new(2, AgentMode::Shared).run(&state, &echo()).await.unwrap();
        // Run back to back, nothing is lost.
        assert_eq!(state.snapshot().context, "\n[Agent 1]: a\n[Agent 2]: b");
    }

    #[tokio::test]
    async fn test_compressed_uses_history_and_compressed_context() {
        let stores = InMemoryStores::new();
        stores.save("old", "launch checklist from last year").await.unwrap();
        let counting = CountingCompletion::new(EchoCompletion::new());
        let services = Services::new(Arc::new(counting.clone()))
            .with_context_store(Arc::new(stores.clone()));
        let state = state_with(&["launch checklist", "b"]);
        state.update(|s| s.compressed_context = "summary".into());

        AgentStep::new(1, AgentMode::Compressed).run(&state, &services).await.unwrap();

        let vars = &counting.calls(TemplateKind::Act)[0];
        assert_eq!(vars.get("compressed_context").map(String::as_str), Some("summary"));
        assert!(vars["relevant_context"].contains("launch checklist from last year"));
        assert_eq!(state.snapshot().context, "\n[Agent 1]: launch checklist");
    }

    #[tokio::test]
    async fn test_compressed_without_store_fails() {
        let state = state_with(&["a", "b"]);
        let err = AgentStep::new(1, AgentMode::Compressed).run(&state, &echo()).await;
        assert!(err.is_err());
        assert!(state.snapshot().sub_results.is_empty());
    }

    #[tokio::test]
    async fn test_memory_agent_records_action() {
        let counting = CountingCompletion::new(EchoCompletion::new());
        let services = Services::new(Arc::new(counting.clone()));
        let state = state_with(&["a", "b"]);
        state.update(|s| {
            let mut memory = MemoryState::new("u", "s");
            memory.semantic_facts = vec!["likes lists".into()];
            s.memory = Some(memory);
        });

        AgentStep::new(1, AgentMode::Sequential)
            .with_memory(true)
            .run(&state, &services)
            .await
            .unwrap();

        let vars = &counting.calls(TemplateKind::Act)[0];
        assert_eq!(vars.get("semantic_context").map(String::as_str), Some("- likes lists"));
        let memory = state.snapshot().memory.unwrap();
        assert_eq!(memory.current_episode_actions, vec!["Agent 1: a"]);
    }
}
