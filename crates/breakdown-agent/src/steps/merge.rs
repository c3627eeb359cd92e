use std::collections::BTreeMap;

use futures::future::BoxFuture;
use tracing::info;

use breakdown_core::error::Result;
use breakdown_core::types::prompt_vars;

use super::templates::{MERGE, MERGE_COMPRESSED, MERGE_WITH_CONTEXT, MERGE_WITH_MEMORY};
use crate::graph::{SharedState, Step};
use crate::services::Services;

pub const STEP_RESULTS_MERGED: &str = "results_merged";

/// Which context field the merge prompt carries alongside the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeContext {
    None,
    Context,
    Compressed,
}

/// Subtask results in agent order, one labelled block each.
pub fn format_results(results: &BTreeMap<String, String>) -> String {
    results
        .iter()
        .map(|(id, r)| format!("\nAgent {}:\n{}\n", id, r))
        .collect()
}

/// Synthesizes `final_result` from whatever results are present.
pub struct MergeStep {
    context: MergeContext,
    memory: bool,
}

impl MergeStep {
    pub fn new(context: MergeContext) -> Self {
        Self {
            context,
            memory: false,
        }
    }

    /// Merge over the full context plus the semantic facts used for the run.
    pub fn with_memory() -> Self {
        Self {
            context: MergeContext::Context,
            memory: true,
        }
    }
}

impl Step for MergeStep {
    fn run<'a>(&'a self, state: &'a SharedState, services: &'a Services) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (task, context, compressed, facts, results, count) = state.read(|s| {
                (
                    s.task.clone(),
                    s.context.clone(),
                    s.compressed_context.clone(),
                    s.memory.as_ref().map(|m| m.facts_block()).unwrap_or_default(),
                    format_results(&s.sub_results),
                    s.sub_results.len(),
                )
            });

            let mut vars = prompt_vars([("task", task.as_str()), ("results", results.as_str())]);
            let template = if self.memory {
                vars.insert("context".into(), context);
                vars.insert("semantic_facts".into(), facts);
                &MERGE_WITH_MEMORY
            } else {
                match self.context {
                    MergeContext::None => &MERGE,
                    MergeContext::Context => {
                        vars.insert("context".into(), context);
                        &MERGE_WITH_CONTEXT
                    }
                    MergeContext::Compressed => {
                        vars.insert("compressed_context".into(), compressed);
                        &MERGE_COMPRESSED
                    }
                }
            };

            let merged = services.completion.complete(template, &vars).await?;
            info!(results = count, merged_len = merged.len(), "Results merged");

            state.update(|s| {
                s.final_result = merged;
                s.step = STEP_RESULTS_MERGED.to_string();
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use breakdown_core::state::TaskState;
    use breakdown_core::types::TemplateKind;
    use breakdown_test_utils::{CountingCompletion, EchoCompletion, ScriptedCompletion};

    #[test]
    fn test_format_results_in_agent_order() {
        let mut results = BTreeMap::new();
        results.insert("2".to_string(), "two".to_string());
        results.insert("1".to_string(), "one".to_string());
        assert_eq!(format_results(&results), "\nAgent 1:\none\n\nAgent 2:\ntwo\n");
        assert_eq!(format_results(&BTreeMap::new()), "");
    }

    #[tokio::test]
    async fn test_merges_any_number_of_results() {
        let services = Services::new(Arc::new(ScriptedCompletion::new(|_, _| Ok("merged".into()))));
        for n in 0..=3 {
            let mut task = TaskState::new("t");
            task.subtasks = vec!["a".into(), "b".into(), "c".into()];
            for i in 1..=n {
                task.sub_results.insert(i.to_string(), format!("r{}", i));
            }
            let state = SharedState::new(task);

            MergeStep::new(MergeContext::None).run(&state, &services).await.unwrap();

            let s = state.snapshot();
            assert_eq!(s.final_result, "merged");
            assert_eq!(s.step, STEP_RESULTS_MERGED);
        }
    }

    #[tokio::test]
    async fn test_context_variants_pick_their_field() {
        let counting = CountingCompletion::new(EchoCompletion::new());
        let services = Services::new(Arc::new(counting.clone()));
        let mut task = TaskState::new("t");
        task.context = "full".into();
        task.compressed_context = "short".into();
        let state = SharedState::new(task);

        MergeStep::new(MergeContext::Context).run(&state, &services).await.unwrap();
        MergeStep::new(MergeContext::Compressed).run(&state, &services).await.unwrap();
        MergeStep::with_memory().run(&state, &services).await.unwrap();

        let calls = counting.calls(TemplateKind::Merge);
        assert_eq!(calls[0].get("context").map(String::as_str), Some("full"));
        assert_eq!(calls[1].get("compressed_context").map(String::as_str), Some("short"));
        assert!(calls[2].contains_key("semantic_facts"));
    }
}
