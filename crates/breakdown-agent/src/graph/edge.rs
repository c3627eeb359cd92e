use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use breakdown_core::state::TaskState;

/// Reserved successor name that terminates a branch.
pub const END: &str = "__end__";

/// Labels produced by [`results_ready`].
pub const MERGE_LABEL: &str = "merge";
pub const WAIT_LABEL: &str = "wait";

/// Identity of one concurrent path of execution within a run. The entry branch is 0.
pub type BranchId = usize;

/// Pure routing function: maps the current state (and the asking branch) to an outcome label.
pub type Predicate = Arc<dyn Fn(&TaskState, BranchId) -> String + Send + Sync>;

/// How a branch leaves a step.
#[derive(Clone)]
pub enum Route {
    /// Unconditional successors. More than one means fan-out.
    Direct(Vec<String>),
    /// Successor chosen by a predicate evaluated against the shared state.
    Conditional {
        predicate: Predicate,
        targets: HashMap<String, String>,
    },
    /// Fan-in through an atomic counter: the last branch to arrive continues to `to`.
    Join { to: String },
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct(targets) => f.debug_tuple("Direct").field(targets).finish(),
            Route::Conditional { targets, .. } => f
                .debug_struct("Conditional")
                .field("targets", targets)
                .finish_non_exhaustive(),
            Route::Join { to } => f.debug_struct("Join").field("to", to).finish(),
        }
    }
}

/// The racy fan-in predicate: `"merge"` once `expected` results are recorded, else `"wait"`.
///
/// Each branch evaluates it on its own after writing its result, so two
/// branches can both observe the full count and both proceed to merge.
pub fn results_ready(expected: usize) -> Predicate {
    Arc::new(move |state: &TaskState, _branch: BranchId| {
        if state.sub_results.len() == expected {
            MERGE_LABEL.to_string()
        } else {
            WAIT_LABEL.to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_ready() {
        let predicate = results_ready(2);
        let mut state = TaskState::new("t");
        assert_eq!(predicate(&state, 1), WAIT_LABEL);
        state.sub_results.insert("1".into(), "a".into());
        assert_eq!(predicate(&state, 1), WAIT_LABEL);
        state.sub_results.insert("2".into(), "b".into());
        assert_eq!(predicate(&state, 1), MERGE_LABEL);
        assert_eq!(predicate(&state, 2), MERGE_LABEL);
    }

    #[test]
    fn test_results_ready_ignores_branch_identity() {
        let predicate = results_ready(1);
        let mut state = TaskState::new("t");
        state.sub_results.insert("1".into(), "a".into());
        assert_eq!(predicate(&state, 0), predicate(&state, 7));
    }

    #[test]
    fn test_route_debug_hides_predicate() {
        let route = Route::Conditional {
            predicate: results_ready(2),
            targets: HashMap::from([(MERGE_LABEL.to_string(), "merger".to_string())]),
        };
        let text = format!("{:?}", route);
        assert!(text.contains("merger"));
    }
}
