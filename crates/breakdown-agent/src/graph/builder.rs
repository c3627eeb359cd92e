use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use breakdown_core::error::{BreakdownError, Result};

use super::edge::{Predicate, Route, END};
use super::step::Step;

enum EdgeSpec {
    Direct(String),
    Conditional {
        predicate: Predicate,
        targets: Vec<(String, String)>,
    },
    Join(String),
}

/// Collects steps and edges, then validates them into a [`WorkflowGraph`].
///
/// Nothing is checked until [`GraphBuilder::build`], which reports the first
/// problem found as [`BreakdownError::Graph`].
#[derive(Default)]
pub struct GraphBuilder {
    steps: Vec<(String, Arc<dyn Step>)>,
    entries: Vec<String>,
    edges: Vec<(String, EdgeSpec)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, name: impl Into<String>, step: Arc<dyn Step>) -> &mut Self {
        self.steps.push((name.into(), step));
        self
    }

    pub fn set_entry(&mut self, name: impl Into<String>) -> &mut Self {
        self.entries.push(name.into());
        self
    }

    /// Unconditional edge. Several from the same step fan out concurrently.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), EdgeSpec::Direct(to.into())));
        self
    }

    /// Predicate edge: the label the predicate returns selects the successor.
    pub fn add_conditional_edge<L, T>(
        &mut self,
        from: impl Into<String>,
        predicate: Predicate,
        targets: impl IntoIterator<Item = (L, T)>,
    ) -> &mut Self
    where
        L: Into<String>,
        T: Into<String>,
    {
        let targets = targets
            .into_iter()
            .map(|(label, to)| (label.into(), to.into()))
            .collect();
        self.edges
            .push((from.into(), EdgeSpec::Conditional { predicate, targets }));
        self
    }

    /// Atomic fan-in edge. The join arity of `to` is the number of join edges into it.
    pub fn add_join(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), EdgeSpec::Join(to.into())));
        self
    }

    pub fn build(self) -> Result<WorkflowGraph> {
        let invalid = |msg: String| Err(BreakdownError::Graph(msg));

        let mut steps: HashMap<String, Arc<dyn Step>> = HashMap::new();
        for (name, step) in self.steps {
            if name == END {
                return invalid(format!("'{}' is reserved for the terminal sentinel", END));
            }
            if steps.insert(name.clone(), step).is_some() {
                return invalid(format!("step '{}' registered twice", name));
            }
        }

        let entry = match self.entries.as_slice() {
            [] => return invalid("no entry step set".into()),
            [one] => one.clone(),
            many => return invalid(format!("more than one entry point: {}", many.join(", "))),
        };
        if !steps.contains_key(&entry) {
            return invalid(format!("entry step '{}' is not registered", entry));
        }

        let check_target = |from: &str, to: &str| -> Result<()> {
            if to == END || steps.contains_key(to) {
                Ok(())
            } else {
                Err(BreakdownError::Graph(format!(
                    "edge from '{}' references unregistered step '{}'",
                    from, to
                )))
            }
        };

        let mut routes: HashMap<String, Route> = HashMap::new();
        let mut join_arity: HashMap<String, usize> = HashMap::new();

        for (from, edge) in self.edges {
            if !steps.contains_key(&from) {
                return invalid(format!("edge source '{}' is not a registered step", from));
            }
            match edge {
                EdgeSpec::Direct(to) => {
                    check_target(&from, &to)?;
                    match routes.get_mut(&from) {
                        None => {
                            routes.insert(from, Route::Direct(vec![to]));
                        }
                        Some(Route::Direct(targets)) => {
                            if targets.contains(&to) {
                                return invalid(format!("duplicate edge '{}' -> '{}'", from, to));
                            }
                            targets.push(to);
                        }
                        Some(_) => return invalid(mixed_routes(&from)),
                    }
                }
                EdgeSpec::Conditional { predicate, targets } => {
                    if targets.is_empty() {
                        return invalid(format!("conditional edge from '{}' has no targets", from));
                    }
                    for (_, to) in &targets {
                        check_target(&from, to)?;
                    }
                    if routes.contains_key(&from) {
                        return invalid(mixed_routes(&from));
                    }
                    routes.insert(
                        from,
                        Route::Conditional {
                            predicate,
                            targets: targets.into_iter().collect(),
                        },
                    );
                }
                EdgeSpec::Join(to) => {
                    if to == END {
                        return invalid(format!("join from '{}' cannot target the sentinel", from));
                    }
                    check_target(&from, &to)?;
                    if routes.contains_key(&from) {
                        return invalid(mixed_routes(&from));
                    }
                    *join_arity.entry(to.clone()).or_insert(0) += 1;
                    routes.insert(from, Route::Join { to });
                }
            }
        }

        if let Some(step) = find_unconditional_cycle(&routes) {
            return invalid(format!(
                "cycle through unconditional edges involving '{}'",
                step
            ));
        }

        Ok(WorkflowGraph {
            steps,
            routes,
            entry,
            join_arity,
        })
    }
}

fn mixed_routes(from: &str) -> String {
    format!(
        "step '{}' mixes edge kinds; use either direct edges, one conditional edge, or one join",
        from
    )
}

/// Depth-first search over direct and join edges. Conditional edges may loop.
fn find_unconditional_cycle(routes: &HashMap<String, Route>) -> Option<String> {
    fn successors<'a>(routes: &'a HashMap<String, Route>, step: &str) -> Vec<&'a str> {
        match routes.get(step) {
            Some(Route::Direct(targets)) => targets
                .iter()
                .map(String::as_str)
                .filter(|t| *t != END)
                .collect(),
            Some(Route::Join { to }) => vec![to.as_str()],
            _ => Vec::new(),
        }
    }

    fn visit<'a>(
        routes: &'a HashMap<String, Route>,
        step: &'a str,
        on_path: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if done.contains(step) {
            return None;
        }
        if !on_path.insert(step) {
            return Some(step.to_string());
        }
        for next in successors(routes, step) {
            if let Some(found) = visit(routes, next, on_path, done) {
                return Some(found);
            }
        }
        on_path.remove(step);
        done.insert(step);
        None
    }

    let mut done = HashSet::new();
    let mut names: Vec<&String> = routes.keys().collect();
    names.sort();
    for name in names {
        let mut on_path = HashSet::new();
        if let Some(found) = visit(routes, name, &mut on_path, &mut done) {
            return Some(found);
        }
    }
    None
}

/// An immutable, validated workflow graph. Reusable across any number of runs.
pub struct WorkflowGraph {
    steps: HashMap<String, Arc<dyn Step>>,
    routes: HashMap<String, Route>,
    entry: String,
    join_arity: HashMap<String, usize>,
}

impl WorkflowGraph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    pub fn route(&self, name: &str) -> Option<&Route> {
        self.routes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registered step names, sorted.
    pub fn step_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of join edges into each join target.
    pub fn join_arity(&self) -> &HashMap<String, usize> {
        &self.join_arity
    }
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("entry", &self.entry)
            .field("steps", &self.step_names())
            .field("routes", &self.routes)
            .finish()
    }
}
