use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BreakdownError, Result};

/// Top-level Breakdown configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "anthropic".to_string() }
fn default_model_id() -> String { "claude-3-5-sonnet-20241022".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.1 }

/// Retry configuration for completion requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Which coordination pattern to run and how to shape its graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// One of `parallel_unreliable`, `parallel_shared`, `sequential_reliable`,
    /// `sequential_compressed`.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Number of agent steps in the graph (1..=3).
    #[serde(default = "default_agents")]
    pub agents: usize,
    /// Use the memory-enhanced variant (sequential patterns only).
    #[serde(default)]
    pub memory_enhanced: bool,
    /// Visits of one step in a single run before its branch is terminated.
    #[serde(default = "default_max_step_visits")]
    pub max_step_visits: usize,
    /// Use the per-branch `len(sub_results) == N` join instead of the atomic one.
    #[serde(default)]
    pub racy_join: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            agents: default_agents(),
            memory_enhanced: false,
            max_step_visits: default_max_step_visits(),
            racy_join: false,
        }
    }
}

fn default_pattern() -> String { "sequential_reliable".to_string() }
fn default_agents() -> usize { 2 }
fn default_max_step_visits() -> usize { 5 }

/// Memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// SQLite database path. `None` keeps everything in memory for the process.
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Facts retrieved at the start of a memory-enhanced run.
    #[serde(default = "default_fact_k")]
    pub fact_k: usize,
    /// Similar episodes retrieved at the start of a memory-enhanced run.
    #[serde(default = "default_episode_k")]
    pub episode_k: usize,
    /// Compressed summaries retrieved per compressed agent.
    #[serde(default = "default_history_k")]
    pub history_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            user_id: default_user_id(),
            fact_k: default_fact_k(),
            episode_k: default_episode_k(),
            history_k: default_history_k(),
        }
    }
}

fn default_user_id() -> String { "default".to_string() }
fn default_fact_k() -> usize { 5 }
fn default_episode_k() -> usize { 3 }
fn default_history_k() -> usize { 5 }

/// Embedding model configuration for similarity retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dims() -> usize { 1536 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BreakdownError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| BreakdownError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "Config file absent, using defaults");
            Ok(Self::default())
        }
    }

    /// Reject values no pattern can run with.
    pub fn validate(&self) -> Result<()> {
        let agents = self.orchestrator.agents;
        if !(1..=3).contains(&agents) {
            return Err(BreakdownError::Config(format!(
                "orchestrator.agents must be between 1 and 3, got {}",
                agents
            )));
        }
        if self.orchestrator.max_step_visits == 0 {
            return Err(BreakdownError::Config(
                "orchestrator.max_step_visits must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the memory database path (expand ~).
    pub fn memory_db_path(&self) -> Option<PathBuf> {
        let raw = self.memory.db_path.as_ref()?;
        if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return Some(home.join(rest));
            }
        }
        Some(PathBuf::from(raw))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
