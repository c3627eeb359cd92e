use futures::future::BoxFuture;
use tracing::{info, warn};

use breakdown_core::error::Result;
use breakdown_core::types::prompt_vars;

use super::templates::{DECOMPOSE, DECOMPOSE_WITH_MEMORY};
use crate::graph::{SharedState, Step};
use crate::services::Services;

pub const MIN_SUBTASKS: usize = 2;
pub const MAX_SUBTASKS: usize = 3;
pub const STEP_TASK_BROKEN: &str = "task_broken";

/// Pull list items out of free text.
///
/// Keeps lines that start with a digit, `-` or `*` once trimmed, strips the
/// leading numbering or bullet, and drops lines left empty.
pub fn parse_subtasks(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with(|c: char| c.is_ascii_digit()) || line.starts_with(['-', '*'])
        })
        .map(|line| {
            line.trim_start_matches(|c: char| {
                c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*') || c.is_whitespace()
            })
            .trim()
            .to_string()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// The two subtasks used when a breakdown yields fewer than two items.
pub fn fallback_subtasks(task: &str) -> Vec<String> {
    vec![
        format!("research and analyze {}", task),
        format!("create an implementation plan for {}", task),
    ]
}

/// Parse, fall back on underflow, and cap at [`MAX_SUBTASKS`].
pub fn normalize_subtasks(text: &str, task: &str) -> Vec<String> {
    let mut subtasks = parse_subtasks(text);
    if subtasks.len() < MIN_SUBTASKS {
        warn!(
            parsed = subtasks.len(),
            "Breakdown produced too few subtasks, using fallback"
        );
        subtasks = fallback_subtasks(task);
    }
    subtasks.truncate(MAX_SUBTASKS);
    subtasks
}

/// Breaks the task into 2-3 subtasks.
///
/// With `memory` set, retrieved facts and episodes go into the prompt and the
/// breakdown is recorded as an episode action.
pub struct DecomposeStep {
    memory: bool,
}

impl DecomposeStep {
    pub fn new() -> Self {
        Self { memory: false }
    }

    pub fn with_memory() -> Self {
        Self { memory: true }
    }
}

impl Default for DecomposeStep {
    fn default() -> Self {
        Self::new()
    }
}

impl Step for DecomposeStep {
    fn run<'a>(&'a self, state: &'a SharedState, services: &'a Services) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (task, facts, examples) = state.read(|s| {
                let (facts, examples) = s
                    .memory
                    .as_ref()
                    .map(|m| (m.facts_block(), m.examples_block()))
                    .unwrap_or_default();
                (s.task.clone(), facts, examples)
            });

            let text = if self.memory {
                let vars = prompt_vars([
                    ("task", task.as_str()),
                    ("semantic_context", facts.as_str()),
                    ("few_shot_examples", examples.as_str()),
                ]);
                services.completion.complete(&DECOMPOSE_WITH_MEMORY, &vars).await?
            } else {
                let vars = prompt_vars([("task", task.as_str())]);
                services.completion.complete(&DECOMPOSE, &vars).await?
            };

            let subtasks = normalize_subtasks(&text, &task);
            info!(count = subtasks.len(), "Task broken into subtasks");

            state.update(|s| {
                if let Some(memory) = s.memory.as_mut() {
                    memory
                        .current_episode_actions
                        .push(format!("Task broken into: {}", subtasks.join(" -> ")));
                }
                s.subtasks = subtasks;
                s.step = STEP_TASK_BROKEN.to_string();
            });
            Ok(())
        })
    }
}
