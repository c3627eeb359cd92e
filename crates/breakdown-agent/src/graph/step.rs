use std::sync::Arc;

use futures::future::BoxFuture;

use breakdown_core::error::Result;
use breakdown_core::state::TaskState;

use super::state::SharedState;
use crate::services::Services;

/// A named unit of work in a workflow graph.
///
/// A step reads what it needs from the shared state, performs its external
/// calls, and writes its outputs back. An error aborts the branch the step
/// runs on; sibling branches carry on.
pub trait Step: Send + Sync + 'static {
    fn run<'a>(&'a self, state: &'a SharedState, services: &'a Services) -> BoxFuture<'a, Result<()>>;
}

/// A step backed by a synchronous closure over the state.
pub struct FnStep<F> {
    f: F,
}

impl<F> Step for FnStep<F>
where
    F: Fn(&mut TaskState) -> Result<()> + Send + Sync + 'static,
{
    fn run<'a>(&'a self, state: &'a SharedState, _services: &'a Services) -> BoxFuture<'a, Result<()>> {
        let out = state.update(|s| (self.f)(s));
        Box::pin(async move { out })
    }
}

/// Wrap a closure as a step.
pub fn step_fn<F>(f: F) -> Arc<dyn Step>
where
    F: Fn(&mut TaskState) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnStep { f })
}
