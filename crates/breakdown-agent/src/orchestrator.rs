use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use breakdown_core::config::AppConfig;
use breakdown_core::error::{BreakdownError, Result};
use breakdown_core::event::{EventBus, WorkflowEvent};
use breakdown_core::state::TaskState;

use crate::graph::{ExecutionResult, GraphExecutor, WorkflowGraph};
use crate::patterns::{build_graph, Pattern, PatternInfo, PatternOptions};
use crate::services::Services;

/// Runs tasks under one coordination pattern.
///
/// The graph is built once, when the orchestrator is created or its pattern
/// is switched, and reused for every task.
pub struct Orchestrator {
    pattern: Pattern,
    options: PatternOptions,
    services: Services,
    executor: GraphExecutor,
    events: Option<Arc<EventBus>>,
}

impl Orchestrator {
    pub fn new(pattern: Pattern, services: Services) -> Result<Self> {
        Self::with_options(pattern, PatternOptions::default(), services)
    }

    pub fn with_options(pattern: Pattern, options: PatternOptions, services: Services) -> Result<Self> {
        let executor = build_executor(pattern, &options, &services, None)?;
        Ok(Self {
            pattern,
            options,
            services,
            executor,
            events: None,
        })
    }

    /// Pattern and graph shape from the `[orchestrator]` and `[memory]` sections.
    pub fn from_config(config: &AppConfig, services: Services) -> Result<Self> {
        config.validate()?;
        let pattern: Pattern = config.orchestrator.pattern.parse()?;
        let options = PatternOptions::from_config(&config.orchestrator, &config.memory);
        Self::with_options(pattern, options, services)
    }

    /// Publish run and step lifecycle events to `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.executor = self.executor.with_events(events.clone());
        self.events = Some(events);
        self
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn pattern_info(&self) -> &'static PatternInfo {
        self.pattern.info()
    }

    pub fn options(&self) -> &PatternOptions {
        &self.options
    }

    pub fn graph(&self) -> &WorkflowGraph {
        self.executor.graph()
    }

    /// Run `task` from a fresh state and return the final state.
    pub async fn execute(&self, task: &str) -> Result<TaskState> {
        self.run(TaskState::new(task)).await.map(|r| r.state)
    }

    /// Run `task`, first switching to `pattern` if one is given.
    ///
    /// Switching rebuilds the graph and keeps the new pattern for later calls.
    pub async fn execute_with(&mut self, task: &str, pattern: Option<Pattern>) -> Result<TaskState> {
        if let Some(pattern) = pattern {
            if pattern != self.pattern {
                self.switch_pattern(pattern)?;
            }
        }
        self.execute(task).await
    }

    pub fn switch_pattern(&mut self, pattern: Pattern) -> Result<()> {
        let executor = build_executor(pattern, &self.options, &self.services, self.events.clone())?;
        info!(from = %self.pattern, to = %pattern, "Switched pattern");
        self.pattern = pattern;
        self.executor = executor;
        Ok(())
    }

    /// Run the graph from `initial` and return the full execution record.
    ///
    /// A branch that ended on an error fails the whole call with
    /// [`BreakdownError::Execution`], naming the task and pattern.
    pub async fn run(&self, initial: TaskState) -> Result<ExecutionResult> {
        let task = initial.task.clone();
        let start = Instant::now();
        info!(task = %task, pattern = %self.pattern, agents = self.options.agents, "Starting run");
        self.publish(WorkflowEvent::RunStarted {
            task: task.clone(),
            pattern: self.pattern.to_string(),
        });

        let mut result = self.executor.execute(&self.services, initial).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.publish(WorkflowEvent::RunCompleted {
            merged: result.state.is_merged(),
            elapsed_ms,
        });

        if let Some(failure) = result.failures.drain(..).next() {
            error!(
                task = %task,
                pattern = %self.pattern,
                step = %failure.step,
                "Run failed"
            );
            return Err(BreakdownError::Execution {
                task,
                pattern: self.pattern.to_string(),
                source: Box::new(failure.error),
            });
        }

        info!(
            pattern = %self.pattern,
            merged = result.state.is_merged(),
            elapsed_ms,
            "Run complete"
        );
        Ok(result)
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// Check that `services` can back every step of `pattern`, then build its graph.
fn build_executor(
    pattern: Pattern,
    options: &PatternOptions,
    services: &Services,
    events: Option<Arc<EventBus>>,
) -> Result<GraphExecutor> {
    if pattern.needs_context_store() {
        services.context_store()?;
    }
    if options.memory {
        services.semantic()?;
        services.episodic()?;
    }

    let graph = build_graph(pattern, options)?;
    let executor = GraphExecutor::new(Arc::new(graph)).with_max_visits(options.max_step_visits);
    Ok(match events {
        Some(bus) => executor.with_events(bus),
        None => executor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::JoinPolicy;
    use crate::patterns::MERGER;
    use breakdown_core::types::TemplateKind;
    use breakdown_test_utils::{
        numbered_breakdown, CountingCompletion, EchoCompletion, FailingCompletion, InMemoryStores,
        JitterCompletion, RendezvousCompletion,
    };

    const LAUNCH: &str = "Plan a product launch";

    fn services(completion: impl breakdown_core::traits::CompletionService) -> Services {
        Services::new(Arc::new(completion)).with_memory_store(Arc::new(InMemoryStores::new()))
    }

    #[tokio::test]
    async fn test_product_launch_all_patterns() {
        for pattern in Pattern::ALL {
            let orchestrator = Orchestrator::new(pattern, services(EchoCompletion::new())).unwrap();
            let state = orchestrator.execute(LAUNCH).await.unwrap();

            assert_eq!(
                state.subtasks,
                vec![
                    "research and analyze Plan a product launch".to_string(),
                    "create an implementation plan for Plan a product launch".to_string(),
                ],
                "pattern {}",
                pattern
            );
            for subtask in &state.subtasks {
                assert!(state.final_result.contains(subtask.as_str()), "pattern {}", pattern);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_join_merges_exactly_once() {
        for pattern in [Pattern::ParallelUnreliable, Pattern::ParallelShared] {
            let counting = CountingCompletion::new(JitterCompletion::new(EchoCompletion::new(), 200));
            let orchestrator = Orchestrator::new(pattern, services(counting.clone())).unwrap();

            for _ in 0..1000 {
                let result = orchestrator.run(TaskState::new(LAUNCH)).await.unwrap();
                assert_eq!(result.runs_of(MERGER), 1);
                assert!(result.state.is_merged());
            }
            assert_eq!(counting.count(TemplateKind::Merge), 1000);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shared_context_loses_an_update_when_agents_overlap() {
        // Both agents read `context` before either writes back
        let completion = RendezvousCompletion::new(EchoCompletion::new(), 2);
        let orchestrator = Orchestrator::new(Pattern::ParallelShared, services(completion)).unwrap();

        let state = orchestrator.execute(LAUNCH).await.unwrap();

        assert_eq!(state.sub_results.len(), 2);
        let appends = state.context.matches("[Agent ").count();
        assert_eq!(appends, 1, "context was {:?}", state.context);
        assert!(state.is_merged());
    }

    #[tokio::test]
    async fn test_sequential_agent_sees_previous_result() {
        let counting = CountingCompletion::new(
            EchoCompletion::new().with_breakdown(numbered_breakdown(&["research market", "write plan"])),
        );
        let orchestrator = Orchestrator::new(Pattern::SequentialReliable, services(counting.clone())).unwrap();

        let state = orchestrator.execute(LAUNCH).await.unwrap();

        let acts = counting.calls(TemplateKind::Act);
        assert_eq!(acts.len(), 2);
        let context_for_2 = acts[1].get("context").cloned().unwrap_or_default();
        assert!(!context_for_2.is_empty());
        assert!(context_for_2.contains("research market"));
        assert!(state.context.ends_with("[Agent 2]: write plan"));
    }

    #[tokio::test]
    async fn test_failure_names_task_and_pattern() {
        let completion = FailingCompletion::on_agent("2", "HTTP 500: overloaded");
        let orchestrator = Orchestrator::new(Pattern::ParallelUnreliable, services(completion)).unwrap();

        let err = orchestrator.execute(LAUNCH).await.unwrap_err();
        match err {
            BreakdownError::Execution { task, pattern, source } => {
                assert_eq!(task, LAUNCH);
                assert_eq!(pattern, "parallel_unreliable");
                assert!(matches!(*source, BreakdownError::Completion(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_compressed_requires_context_store() {
        let bare = Services::new(Arc::new(EchoCompletion::new()));
        let err = Orchestrator::new(Pattern::SequentialCompressed, bare).err().unwrap();
        assert!(matches!(err, BreakdownError::Config(_)));
    }

    #[tokio::test]
    async fn test_execute_with_switches_pattern() {
        let mut orchestrator =
            Orchestrator::new(Pattern::SequentialReliable, services(EchoCompletion::new())).unwrap();
        assert!(orchestrator.graph().contains("agent_1"));
        assert!(!orchestrator.graph().contains("compress_1"));

        orchestrator
            .execute_with(LAUNCH, Some(Pattern::SequentialCompressed))
            .await
            .unwrap();

        assert_eq!(orchestrator.pattern(), Pattern::SequentialCompressed);
        assert!(orchestrator.graph().contains("compress_1"));
        assert_eq!(orchestrator.pattern_info().name, "Sequential with Compression");
    }

    #[tokio::test]
    async fn test_memory_run_stores_episode() {
        let stores = InMemoryStores::new();
        let services = Services::new(Arc::new(EchoCompletion::new().with_facts("FACT: launches go out on Tuesdays")))
            .with_memory_store(Arc::new(stores.clone()));
        let options = PatternOptions::default().with_memory(true);
        let orchestrator = Orchestrator::with_options(Pattern::SequentialReliable, options, services).unwrap();

        let state = orchestrator.execute(LAUNCH).await.unwrap();

        let memory = state.memory.unwrap();
        assert_eq!(memory.current_episode_actions.len(), 3);
        assert!(memory.current_episode_actions[0].starts_with("Task broken into: "));
        let episodes = stores.episodes();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].metadata["pattern"], "sequential_reliable");
        assert_eq!(stores.facts(), vec!["launches go out on Tuesdays"]);
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let orchestrator = Orchestrator::new(Pattern::SequentialReliable, services(EchoCompletion::new()))
            .unwrap()
            .with_events(bus.clone());

        orchestrator.execute(LAUNCH).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(WorkflowEvent::RunStarted { .. })));
        assert!(matches!(events.last(), Some(WorkflowEvent::RunCompleted { merged: true, .. })));
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut config = AppConfig::default();
        config.orchestrator.pattern = "parallel_shared".into();
        config.orchestrator.racy_join = true;
        let orchestrator = Orchestrator::from_config(&config, services(EchoCompletion::new())).unwrap();
        assert_eq!(orchestrator.pattern(), Pattern::ParallelShared);
        assert_eq!(orchestrator.options().join, JoinPolicy::Racy);

        config.orchestrator.pattern = "bogus".into();
        let err = Orchestrator::from_config(&config, services(EchoCompletion::new())).err().unwrap();
        assert!(matches!(err, BreakdownError::UnknownPattern(_)));
    }
}
