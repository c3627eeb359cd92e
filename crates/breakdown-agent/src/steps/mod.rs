//! The step library: decomposition, agents, compression, merge and memory.
//!
//! Every step copies what it needs out of the [`SharedState`](crate::graph::SharedState)
//! before calling an external service and writes its outputs back afterwards.
//! No lock is held across a service call.

pub mod agent;
pub mod compress;
pub mod decompose;
pub mod memory;
pub mod merge;
pub mod templates;

pub use agent::{completed_label, AgentMode, AgentStep};
pub use compress::{clamp_words, CompressStep, COMPRESSION_WORD_BUDGET, STEP_CONTEXT_COMPRESSED};
pub use decompose::{
    fallback_subtasks, normalize_subtasks, parse_subtasks, DecomposeStep, MAX_SUBTASKS,
    MIN_SUBTASKS, STEP_TASK_BROKEN,
};
pub use memory::{
    parse_facts, RetrieveMemoryStep, UpdateMemoryStep, STEP_MEMORY_RETRIEVED, STEP_MEMORY_UPDATED,
    SUCCESS_MIN_CHARS,
};
pub use merge::{format_results, MergeContext, MergeStep, STEP_RESULTS_MERGED};
