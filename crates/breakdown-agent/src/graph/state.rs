use std::sync::{Arc, Mutex, MutexGuard};

use breakdown_core::state::TaskState;

/// The task state shared by every branch of one run.
///
/// Each `read` or `update` takes the lock for the duration of the closure
/// only. A step that reads a field, awaits an external call, and then writes
/// a value derived from what it read is doing an unsynchronized
/// read-modify-write: a sibling branch may write in between and its update
/// is lost. Writes to disjoint keys of `sub_results` never conflict.
#[derive(Clone, Default)]
pub struct SharedState(Arc<Mutex<TaskState>>);

impl SharedState {
    pub fn new(state: TaskState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        // A panicking step must not wedge its siblings
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&TaskState) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with exclusive access to the state.
    pub fn update<R>(&self, f: impl FnOnce(&mut TaskState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Clone the current state.
    pub fn snapshot(&self) -> TaskState {
        self.lock().clone()
    }
}
