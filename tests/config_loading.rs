use breakdown_core::config::AppConfig;
use breakdown_core::error::BreakdownError;
use breakdown_test_utils::write_config;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-test-key"
base_url = "http://localhost:8080/v1"
max_tokens = 2048
temperature = 0.5

[model.retry]
max_retries = 5
initial_backoff_ms = 200

[[fallback_models]]
provider = "anthropic"
model_id = "claude-3-5-haiku-20241022"

[orchestrator]
pattern = "parallel_shared"
agents = 3
racy_join = true
max_step_visits = 8

[memory]
db_path = "/tmp/breakdown-test/memory.db"
user_id = "alice"
fact_k = 7
history_k = 2

[embedding]
base_url = "http://localhost:8081/v1"
model = "nomic-embed-text"
dimensions = 768
"#;

    let (_dir, path) = write_config(toml_content);
    let config = AppConfig::load(&path).expect("load config");

    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.model_id, "gpt-4o-mini");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);
    let retry = config.model.retry.expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);
    assert_eq!(retry.max_backoff_ms, 30000);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, "anthropic");

    assert_eq!(config.orchestrator.pattern, "parallel_shared");
    assert_eq!(config.orchestrator.agents, 3);
    assert!(config.orchestrator.racy_join);
    assert_eq!(config.orchestrator.max_step_visits, 8);

    assert_eq!(config.memory.user_id, "alice");
    assert_eq!(config.memory.fact_k, 7);
    assert_eq!(config.memory.episode_k, 3);
    assert_eq!(config.memory.history_k, 2);

    let embedding = config.embedding.expect("embedding present");
    assert_eq!(embedding.model, "nomic-embed-text");
    assert_eq!(embedding.dimensions, 768);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("BREAKDOWN_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "test-model"
api_key = "${BREAKDOWN_TEST_API_KEY}"
"#;

    let (_dir, path) = write_config(toml_content);
    let config = AppConfig::load(&path).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("BREAKDOWN_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[model]
model_id = "llama3.2"
"#;

    let (_dir, path) = write_config(toml_content);
    let config = AppConfig::load(&path).expect("load config");

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.max_tokens, 4096);
    assert!(config.model.retry.is_none());
    assert!(config.fallback_models.is_empty());
    assert_eq!(config.orchestrator.pattern, "sequential_reliable");
    assert_eq!(config.orchestrator.agents, 2);
    assert!(!config.orchestrator.memory_enhanced);
    assert!(config.memory.db_path.is_none());
    assert_eq!(config.memory.user_id, "default");
    assert!(config.embedding.is_none());
}

#[test]
fn test_out_of_range_agents_rejected_on_load() {
    let toml_content = r#"
[orchestrator]
agents = 5
"#;

    let (_dir, path) = write_config(toml_content);
    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, BreakdownError::Config(ref msg) if msg.contains("agents")));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let (_dir, path) = write_config("[orchestrator\npattern = ");
    assert!(matches!(AppConfig::load(&path), Err(BreakdownError::Config(_))));
}
