use std::sync::Arc;

use breakdown_agent::{Orchestrator, Pattern, PatternOptions, Services};
use breakdown_core::config::AppConfig;
use breakdown_core::types::TemplateKind;
use breakdown_memory::{HashingEmbedder, SqliteMemoryStore};
use breakdown_test_utils::{
    numbered_breakdown, write_config, CountingCompletion, EchoCompletion, ScriptedCompletion,
};

const LAUNCH: &str = "Plan a product launch";

fn sqlite_services(completion: impl breakdown_core::traits::CompletionService) -> (Services, Arc<SqliteMemoryStore>) {
    let store = Arc::new(
        SqliteMemoryStore::in_memory(Arc::new(HashingEmbedder::default())).expect("open store"),
    );
    let services = Services::new(Arc::new(completion)).with_memory_store(store.clone());
    (services, store)
}

#[tokio::test]
async fn test_fallback_scenario_under_every_pattern() {
    for pattern in Pattern::ALL {
        let (services, _) = sqlite_services(EchoCompletion::new());
        let orchestrator = Orchestrator::new(pattern, services).expect("build orchestrator");

        let state = orchestrator.execute(LAUNCH).await.expect("run");

        assert_eq!(state.subtasks.len(), 2);
        assert!(state.final_result.contains("research and analyze Plan a product launch"));
        assert!(state
            .final_result
            .contains("create an implementation plan for Plan a product launch"));
        assert_eq!(state.step, "results_merged");
    }
}

#[tokio::test]
async fn test_three_agents_each_get_their_subtask() {
    let breakdown = numbered_breakdown(&["market research", "pricing", "press kit", "extra item"]);
    let completion = ScriptedCompletion::new(move |kind, vars| {
        Ok(match kind {
            TemplateKind::Decompose => breakdown.clone(),
            TemplateKind::Act => format!("done: {}", vars["task"]),
            TemplateKind::Merge => vars["results"].clone(),
            TemplateKind::Compress => vars["context"].clone(),
            TemplateKind::ExtractFacts => String::new(),
        })
    });
    let (services, _) = sqlite_services(completion);
    let options = PatternOptions::default().with_agents(3);
    let orchestrator =
        Orchestrator::with_options(Pattern::ParallelUnreliable, options, services).expect("build");

    let state = orchestrator.execute(LAUNCH).await.expect("run");

    assert_eq!(state.subtasks, vec!["market research", "pricing", "press kit"]);
    assert_eq!(state.sub_results["1"], "done: market research");
    assert_eq!(state.sub_results["3"], "done: press kit");
    assert!(state.context.is_empty());
}

#[tokio::test]
async fn test_more_agents_than_subtasks_still_merges() {
    let (services, _) = sqlite_services(EchoCompletion::new());
    let options = PatternOptions::default().with_agents(3);
    let orchestrator =
        Orchestrator::with_options(Pattern::SequentialReliable, options, services).expect("build");

    let state = orchestrator.execute(LAUNCH).await.expect("run");

    // Fallback yields two subtasks; agent 3 has nothing to do
    assert_eq!(state.sub_results.len(), 2);
    assert!(state.is_merged());
}

#[tokio::test]
async fn test_compressed_run_files_summaries() {
    let (services, store) = sqlite_services(EchoCompletion::new());
    let orchestrator = Orchestrator::new(Pattern::SequentialCompressed, services).expect("build");

    let state = orchestrator.execute(LAUNCH).await.expect("run");

    assert!(!state.compressed_context.is_empty());
    assert!(state.compressed_context.split_whitespace().count() <= 200);
    assert_eq!(store.stats().expect("stats").summaries, 2);
}

#[tokio::test]
async fn test_memory_carries_over_between_runs() {
    let completion = CountingCompletion::new(
        EchoCompletion::new()
            .with_breakdown(numbered_breakdown(&[
                "survey every launch channel and rank them by expected reach",
                "draft a launch timeline covering press, partners and support",
            ]))
            .with_facts("FACT: launches happen on Tuesdays"),
    );
    let (services, store) = sqlite_services(completion.clone());
    let options = PatternOptions::default().with_memory(true);
    let orchestrator =
        Orchestrator::with_options(Pattern::SequentialReliable, options, services).expect("build");

    orchestrator.execute(LAUNCH).await.expect("first run");
    let second = orchestrator.execute(LAUNCH).await.expect("second run");

    let stats = store.stats().expect("stats");
    assert_eq!(stats.episodes, 2);
    assert_eq!(stats.facts, 2);

    let memory = second.memory.expect("memory state");
    assert!(memory
        .semantic_facts
        .iter()
        .any(|f| f == "launches happen on Tuesdays"));
    assert_eq!(memory.episodic_examples.len(), 1);
    assert_eq!(memory.episodic_examples[0].prior_task, LAUNCH);

    // The second decomposition saw the first run's episode
    let decomposes = completion.calls(TemplateKind::Decompose);
    assert!(decomposes[1]["few_shot_examples"].contains("Example 1:"));
}

#[tokio::test]
async fn test_orchestrator_from_config_file() {
    let (_dir, path) = write_config(
        r#"
[orchestrator]
pattern = "parallel_shared"
agents = 2
"#,
    );
    let config = AppConfig::load(&path).expect("load config");
    let (services, _) = sqlite_services(EchoCompletion::new());

    let orchestrator = Orchestrator::from_config(&config, services).expect("build");
    assert_eq!(orchestrator.pattern(), Pattern::ParallelShared);

    let state = orchestrator.execute(LAUNCH).await.expect("run");
    assert!(state.is_merged());
    assert!(!state.context.is_empty());
}

#[tokio::test]
async fn test_memory_on_parallel_pattern_is_rejected() {
    let mut config = AppConfig::default();
    config.orchestrator.pattern = "parallel_unreliable".into();
    config.orchestrator.memory_enhanced = true;
    let (services, _) = sqlite_services(EchoCompletion::new());

    assert!(Orchestrator::from_config(&config, services).is_err());
}
