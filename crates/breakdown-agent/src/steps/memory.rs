use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use breakdown_core::error::Result;
use breakdown_core::state::MemoryState;
use breakdown_core::types::{prompt_vars, Episode};

use super::templates::EXTRACT_FACTS;
use crate::graph::{SharedState, Step};
use crate::services::Services;

pub const STEP_MEMORY_RETRIEVED: &str = "memory_retrieved";
pub const STEP_MEMORY_UPDATED: &str = "memory_updated";

/// Outcomes longer than this count as successful when no feedback was given.
pub const SUCCESS_MIN_CHARS: usize = 100;

/// Lines of the form `FACT: ...`, prefix stripped.
pub fn parse_facts(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("FACT:"))
        .map(|fact| fact.trim().to_string())
        .filter(|fact| !fact.is_empty())
        .collect()
}

/// Loads relevant facts and successful episodes once, at the start of a run.
pub struct RetrieveMemoryStep {
    user_id: String,
    fact_k: usize,
    episode_k: usize,
}

impl RetrieveMemoryStep {
    pub fn new(user_id: impl Into<String>, fact_k: usize, episode_k: usize) -> Self {
        Self {
            user_id: user_id.into(),
            fact_k,
            episode_k,
        }
    }
}

impl Step for RetrieveMemoryStep {
    fn run<'a>(&'a self, state: &'a SharedState, services: &'a Services) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let semantic = services.semantic()?;
            let episodic = services.episodic()?;

            let (task, user_id) = state.update(|s| {
                let memory = s
                    .memory
                    .get_or_insert_with(|| MemoryState::new(self.user_id.clone(), Uuid::new_v4().to_string()));
                (s.task.clone(), memory.user_id.clone())
            });

            let query = format!("user: {} task: {}", user_id, task);
            let facts = semantic.query_facts(&query, self.fact_k).await?;
            let episodes = episodic.query_similar_episodes(&task, self.episode_k).await?;
            info!(
                user = %user_id,
                facts = facts.len(),
                episodes = episodes.len(),
                "Memory retrieved"
            );

            state.update(|s| {
                if let Some(memory) = s.memory.as_mut() {
                    memory.semantic_facts = facts;
                    memory.episodic_examples = episodes.iter().map(Episode::to_example).collect();
                    memory.current_episode_actions.clear();
                }
                s.step = STEP_MEMORY_RETRIEVED.to_string();
            });
            Ok(())
        })
    }
}

/// Stores the finished run as an episode and files any facts it revealed.
pub struct UpdateMemoryStep {
    pattern: String,
}

impl UpdateMemoryStep {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl Step for UpdateMemoryStep {
    fn run<'a>(&'a self, state: &'a SharedState, services: &'a Services) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let semantic = services.semantic()?;
            let episodic = services.episodic()?;

            let snapshot = state.snapshot();
            let Some(memory) = snapshot.memory.as_ref() else {
                debug!("No memory state, nothing to store");
                return Ok(());
            };

            let success = memory
                .feedback
                .unwrap_or(snapshot.final_result.len() > SUCCESS_MIN_CHARS);
            let episode = Episode::new(
                memory.current_episode_actions.clone(),
                snapshot.final_result.clone(),
                success,
                json!({
                    "task": snapshot.task,
                    "user_id": memory.user_id,
                    "session_id": memory.session_id,
                    "pattern": self.pattern,
                }),
            );
            episodic.add_episode(episode).await?;

            let conversation = format!("Task: {}\nResult: {}", snapshot.task, snapshot.final_result);
            let vars = prompt_vars([
                ("user_id", memory.user_id.as_str()),
                ("conversation", conversation.as_str()),
            ]);
            let extracted = services.completion.complete(&EXTRACT_FACTS, &vars).await?;
            let facts = parse_facts(&extracted);
            let extracted_at = chrono::Utc::now().to_rfc3339();
            for fact in &facts {
                let metadata = json!({
                    "user_id": memory.user_id,
                    "session_id": memory.session_id,
                    "extracted_at": extracted_at,
                });
                semantic.add_fact(fact, metadata).await?;
            }
            info!(success, facts = facts.len(), "Memory updated");

            state.update(|s| s.step = STEP_MEMORY_UPDATED.to_string());
            Ok(())
        })
    }
}
