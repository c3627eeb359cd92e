use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// How concurrent agent branches rejoin at the merge step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Atomic arrival counter; merge runs exactly once per run.
    #[default]
    Atomic,
    /// Per-branch `len(sub_results) == N` check against the shared state.
    Racy,
}

/// Counts branch arrivals at one join target.
#[derive(Debug)]
pub struct JoinCounter {
    arrivals: AtomicUsize,
    expected: usize,
}

impl JoinCounter {
    pub fn new(expected: usize) -> Self {
        Self {
            arrivals: AtomicUsize::new(0),
            expected,
        }
    }

    /// Record one arrival. Returns true for exactly one caller: the one completing the set.
    pub fn arrive(&self) -> bool {
        self.arrivals.fetch_add(1, Ordering::AcqRel) + 1 == self.expected
    }

    pub fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::Acquire)
    }
}

/// Per-run join counters, one per join target.
#[derive(Debug, Default)]
pub struct JoinTable {
    counters: HashMap<String, JoinCounter>,
}

impl JoinTable {
    pub fn new(arity: &HashMap<String, usize>) -> Self {
        Self {
            counters: arity
                .iter()
                .map(|(target, n)| (target.clone(), JoinCounter::new(*n)))
                .collect(),
        }
    }

    /// Record an arrival at `target`. A target with no counter is treated as a join of one.
    pub fn arrive(&self, target: &str) -> bool {
        self.counters.get(target).map_or(true, JoinCounter::arrive)
    }

    pub fn arrivals(&self, target: &str) -> usize {
        self.counters.get(target).map_or(0, JoinCounter::arrivals)
    }
}
