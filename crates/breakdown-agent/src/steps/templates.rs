//! Fixed instructional templates, one per step kind and variant.
//!
//! Placeholders are `{name}`; see [`PromptTemplate::render`].

use breakdown_core::types::{PromptTemplate, TemplateKind};

pub const DECOMPOSE: PromptTemplate = PromptTemplate::new(
    TemplateKind::Decompose,
    "You are a task breakdown specialist. Break the following complex task into 2-3 clear, actionable subtasks.

Task: {task}

Instructions:
1. Analyze the task and identify its logical components
2. Create 2-3 subtasks that can be worked on independently
3. Make each subtask specific and actionable
4. Return only the subtasks as a numbered list

Subtasks:",
);

pub const DECOMPOSE_WITH_MEMORY: PromptTemplate = PromptTemplate::new(
    TemplateKind::Decompose,
    "You are a task breakdown specialist with access to memory of successful patterns.

TASK: {task}

SEMANTIC MEMORY (known facts):
{semantic_context}

EPISODIC MEMORY (successful patterns):
{few_shot_examples}

Instructions:
1. Analyze the task and identify its logical components
2. Create 2-3 subtasks that can be worked on sequentially, each building on the previous one
3. Use the successful patterns as guidance and respect the known facts
4. Return only the subtasks as a numbered list

Subtasks:",
);

pub const AGENT_ISOLATED: PromptTemplate = PromptTemplate::new(
    TemplateKind::Act,
    "You are Sub-agent {agent_id}, working on one subtask of a larger project.

Your task: {task}

Instructions:
1. Focus only on your assigned subtask
2. Provide detailed, actionable results
3. Be thorough but concise

Your response:",
);

pub const AGENT_SHARED: PromptTemplate = PromptTemplate::new(
    TemplateKind::Act,
    "You are Sub-agent {agent_id}, working on one subtask of a larger project.

Shared context: {history}
Your task: {task}

Instructions:
1. Consider the shared context from other agents
2. Focus on your assigned subtask
3. Build upon or complement work from other agents

Your response:",
);

pub const AGENT_SEQUENTIAL: PromptTemplate = PromptTemplate::new(
    TemplateKind::Act,
    "You are Sub-agent {agent_id}, working on one subtask of a larger project.

Previous context: {context}
Your task: {task}

Instructions:
1. Build upon the previous work and context
2. Focus on your assigned subtask
3. Make sure your work integrates with previous results

Your response:",
);

pub const AGENT_SEQUENTIAL_WITH_MEMORY: PromptTemplate = PromptTemplate::new(
    TemplateKind::Act,
    "You are Sub-agent {agent_id}.

TASK: {task}

SEMANTIC MEMORY (known facts):
{semantic_context}

EPISODIC MEMORY (successful patterns):
{few_shot_examples}

CURRENT CONTEXT: {context}

Instructions:
1. Follow proven successful patterns where they apply
2. Use the known facts to personalize your approach
3. Build upon the work of previous agents
4. Provide detailed, actionable results for your subtask

Your response:",
);

pub const AGENT_COMPRESSED: PromptTemplate = PromptTemplate::new(
    TemplateKind::Act,
    "You are Sub-agent {agent_id}, working on one subtask of a larger project.

Compressed context: {compressed_context}
Relevant history: {relevant_context}
Current task: {task}

Instructions:
1. Use the compressed context to understand the project scope
2. Leverage relevant history for your task
3. Provide detailed, actionable results that fit the overall project

Your response:",
);

pub const AGENT_COMPRESSED_WITH_MEMORY: PromptTemplate = PromptTemplate::new(
    TemplateKind::Act,
    "You are Sub-agent {agent_id}.

Compressed context: {compressed_context}
Relevant history: {relevant_context}
Known facts:
{semantic_context}
Successful patterns:
{few_shot_examples}
Current task: {task}

Instructions:
1. Use the compressed context and history to understand the project scope
2. Apply known facts and proven patterns where they fit
3. Provide detailed, actionable results for your subtask

Your response:",
);

pub const COMPRESS: PromptTemplate = PromptTemplate::new(
    TemplateKind::Compress,
    "Compress the following context into key insights (under {word_budget} words).

Context: {context}

Instructions:
1. Preserve task goals, completed work and key decisions
2. Remove verbose explanations and redundant information
3. Keep the result under {word_budget} words

Compressed context:",
);

pub const COMPRESS_WITH_MEMORY: PromptTemplate = PromptTemplate::new(
    TemplateKind::Compress,
    "Compress the following context (under {word_budget} words) while preserving
key task progress and decisions, important facts about the user and domain,
action patterns that worked, and failed approaches to avoid.

Current context: {context}
Semantic facts: {semantic_facts}
Episode actions: {episode_actions}

Compressed context:",
);

pub const MERGE: PromptTemplate = PromptTemplate::new(
    TemplateKind::Merge,
    "You are a result merger. Combine the following subtask results into a comprehensive final result.

Original task: {task}
Subtask results:
{results}

Instructions:
1. Synthesize all subtask results into a coherent final result
2. Make sure the final result addresses the original task completely
3. Keep the quality and detail of the individual results

Final result:",
);

pub const MERGE_WITH_CONTEXT: PromptTemplate = PromptTemplate::new(
    TemplateKind::Merge,
    "You are a result merger. Combine the following subtask results into a comprehensive final result.

Original task: {task}
Context: {context}
Subtask results:
{results}

Instructions:
1. Consider the accumulated context
2. Synthesize all subtask results into a coherent final result
3. Make sure the final result addresses the original task completely

Final result:",
);

pub const MERGE_COMPRESSED: PromptTemplate = PromptTemplate::new(
    TemplateKind::Merge,
    "You are a result merger. Combine the following subtask results into a comprehensive final result.

Original task: {task}
Compressed context: {compressed_context}
Subtask results:
{results}

Instructions:
1. Consider the compressed context and project scope
2. Synthesize all subtask results into a coherent final result
3. Make sure the final result addresses the original task completely

Final result:",
);

pub const MERGE_WITH_MEMORY: PromptTemplate = PromptTemplate::new(
    TemplateKind::Merge,
    "You are a result merger with access to memory of successful patterns.

Original task: {task}
Context: {context}
Semantic facts used: {semantic_facts}
Subtask results:
{results}

Instructions:
1. Synthesize all subtask results into a coherent final result
2. Make sure the final result addresses the original task completely
3. Consider how this result might inform future similar tasks

Final result:",
);

pub const EXTRACT_FACTS: PromptTemplate = PromptTemplate::new(
    TemplateKind::ExtractFacts,
    "Extract factual information and user preferences from this interaction.
Focus on user preferences, stated facts, domain knowledge and personal context.

User: {user_id}
Interaction:
{conversation}

Return each fact on its own line starting with \"FACT:\"",
);

#[cfg(test)]
mod tests {
    use super::*;
    use breakdown_core::types::prompt_vars;

    #[test]
    fn test_agent_templates_take_the_subtask_as_task() {
        for t in [
            AGENT_ISOLATED,
            AGENT_SHARED,
            AGENT_SEQUENTIAL,
            AGENT_SEQUENTIAL_WITH_MEMORY,
            AGENT_COMPRESSED,
            AGENT_COMPRESSED_WITH_MEMORY,
        ] {
            assert_eq!(t.kind, TemplateKind::Act);
            assert!(t.text.contains("{task}"));
            assert!(t.text.contains("{agent_id}"));
        }
    }

    #[test]
    fn test_merge_templates_list_results() {
        for t in [MERGE, MERGE_WITH_CONTEXT, MERGE_COMPRESSED, MERGE_WITH_MEMORY] {
            assert_eq!(t.kind, TemplateKind::Merge);
            assert!(t.text.contains("{results}"));
        }
    }

    #[test]
    fn test_compress_renders_budget() {
        let vars = prompt_vars([("context", "ctx"), ("word_budget", "200")]);
        let text = COMPRESS.render(&vars);
        assert!(text.contains("under 200 words"));
        assert!(!text.contains('{'));
    }
}
