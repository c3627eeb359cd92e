use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named variables substituted into a prompt template.
pub type PromptVars = BTreeMap<String, String>;

/// Which kind of step a prompt template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Break the task into subtasks.
    Decompose,
    /// Produce the result for one subtask.
    Act,
    /// Synthesize the final result from all subtask results.
    Merge,
    /// Summarize the working context under a word budget.
    Compress,
    /// Pull `FACT:` lines out of a finished interaction.
    ExtractFacts,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Decompose => "decompose",
            TemplateKind::Act => "act",
            TemplateKind::Merge => "merge",
            TemplateKind::Compress => "compress",
            TemplateKind::ExtractFacts => "extract_facts",
        }
    }
}

/// A fixed instructional template with `{name}` placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub kind: TemplateKind,
    pub text: &'static str,
}

impl PromptTemplate {
    pub const fn new(kind: TemplateKind, text: &'static str) -> Self {
        Self { kind, text }
    }

    /// Substitute `{name}` placeholders with values from `vars`.
    ///
    /// Placeholders without a matching variable are left untouched.
    pub fn render(&self, vars: &PromptVars) -> String {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let re = PLACEHOLDER.get_or_init(|| {
            Regex::new(r"\{([a-z_]+)\}").unwrap_or_else(|_| unreachable!("static pattern"))
        });
        re.replace_all(self.text, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
    }
}

/// Build a [`PromptVars`] map from `(name, value)` pairs.
pub fn prompt_vars<I, K, V>(pairs: I) -> PromptVars
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A stored record of a past action sequence and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actions: Vec<String>,
    pub outcome: String,
    pub success: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Episode {
    pub fn new(
        actions: Vec<String>,
        outcome: impl Into<String>,
        success: bool,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actions,
            outcome: outcome.into(),
            success,
            metadata,
        }
    }

    /// Text used to index this episode for similarity search.
    pub fn pattern_text(&self) -> String {
        format!(
            "Actions: {} | Outcome: {}",
            self.actions.join(" -> "),
            self.outcome
        )
    }

    /// Condense into the few-shot form folded into prompts.
    pub fn to_example(&self) -> EpisodeExample {
        EpisodeExample {
            prior_task: self
                .metadata
                .get("task")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            actions: self.actions.clone(),
            outcome: self.outcome.clone(),
            success: self.success,
        }
    }
}

/// An episode as presented to a step: what was asked, what was done, how it went.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeExample {
    pub prior_task: String,
    pub actions: Vec<String>,
    pub outcome: String,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_vars() {
        let t = PromptTemplate::new(TemplateKind::Act, "Agent {agent_id} works on: {task}");
        let vars = prompt_vars([("agent_id", "1"), ("task", "write docs")]);
        assert_eq!(t.render(&vars), "Agent 1 works on: write docs");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let t = PromptTemplate::new(TemplateKind::Merge, "Task: {task}\nContext: {context}");
        let vars = prompt_vars([("task", "x")]);
        assert_eq!(t.render(&vars), "Task: x\nContext: {context}");
    }

    #[test]
    fn test_render_does_not_expand_values() {
        let t = PromptTemplate::new(TemplateKind::Act, "{task}");
        let vars = prompt_vars([("task", "literal {context}"), ("context", "nope")]);
        assert_eq!(t.render(&vars), "literal {context}");
    }

    #[test]
    fn test_episode_example() {
        let ep = Episode::new(
            vec!["Agent 1: research".into(), "Agent 2: plan".into()],
            "a plan",
            true,
            serde_json::json!({"task": "launch"}),
        );
        assert_eq!(ep.pattern_text(), "Actions: Agent 1: research -> Agent 2: plan | Outcome: a plan");
        let ex = ep.to_example();
        assert_eq!(ex.prior_task, "launch");
        assert_eq!(ex.actions.len(), 2);
        assert!(ex.success);
    }
}
