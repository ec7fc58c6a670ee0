//! Polling scheduler for the step graphs.

use std::{
    collections::{BTreeMap, HashMap},
    thread,
    time::Duration,
};

use fado_core::{StepError, StepRef, StepState, VariableRef};
use petgraph::graph::NodeIndex;
use tracing::{debug, trace};

use crate::{Error, EvaluationGraph, FunctionRegistry, StepFailure, registry::Entry};

/// Scheduler bookkeeping for one step during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Running,
    Done,
    Errored,
}

impl Progress {
    fn is_complete(self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }
}

/// The value and gradient step graphs of a set of functions.
#[derive(Debug, Default)]
pub struct Executor {
    values: EvaluationGraph,
    gradients: EvaluationGraph,
}

impl Executor {
    /// Builds both graphs and hands every step the variables of the functions
    /// that use it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicDependency`] if the chains order shared steps
    /// inconsistently.
    pub fn build(registry: &FunctionRegistry) -> Result<Self, Error> {
        let mut values = EvaluationGraph::new();
        let mut gradients = EvaluationGraph::new();
        let mut users: Vec<(StepRef, Vec<VariableRef>)> = Vec::new();
        let mut index: HashMap<usize, usize> = HashMap::new();

        for entry in registry.entries() {
            let function = entry.function().borrow();
            let value_chain = function.value_chain();
            let gradient_chain = function.gradient_chain();
            values.add_chain(&value_chain);
            gradients.add_chain(&gradient_chain);

            let variables = function.variables();
            for step in value_chain.iter().chain(&gradient_chain) {
                let slot = *index.entry(step.key()).or_insert_with(|| {
                    users.push((step.clone(), Vec::new()));
                    users.len() - 1
                });
                let known = &mut users[slot].1;
                for variable in &variables {
                    if !known.contains(variable) {
                        known.push(variable.clone());
                    }
                }
            }
        }

        values.call_order()?;
        gradients.call_order()?;

        for (step, variables) in &users {
            step.borrow_mut().update_variables(variables);
        }

        debug!(
            value_steps = values.node_count(),
            gradient_steps = gradients.node_count(),
            "built evaluation graphs"
        );
        Ok(Self { values, gradients })
    }

    #[must_use]
    pub fn values(&self) -> &EvaluationGraph {
        &self.values
    }

    #[must_use]
    pub fn gradients(&self) -> &EvaluationGraph {
        &self.gradients
    }

    /// Runs every value step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Evaluations`] if any step failed.
    pub fn run_values(&self, wait: Duration) -> Result<(), Error> {
        drain(&self.values, self.values.nodes(), wait)
    }

    /// Runs the gradient steps needed by `entries`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Evaluations`] if any step failed.
    pub fn run_gradients<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a Entry>,
        wait: Duration,
    ) -> Result<(), Error> {
        let mut active = Vec::new();
        for entry in entries {
            let chain = entry.function().borrow().gradient_chain();
            active.extend(chain.iter().filter_map(|step| self.gradients.node(step)));
        }
        drain(&self.gradients, active, wait)
    }
}

/// Polls the `active` steps and everything they depend on until all of them
/// have finished, sleeping `wait` between passes.
///
/// A step starts once all its dependencies are complete, whether they
/// succeeded or not. Failures are collected and reported after the graph has
/// drained.
fn drain(
    graph: &EvaluationGraph,
    active: impl IntoIterator<Item = NodeIndex>,
    wait: Duration,
) -> Result<(), Error> {
    let mut progress: BTreeMap<NodeIndex, Progress> =
        active.into_iter().map(|node| (node, Progress::Pending)).collect();
    let mut failures = Vec::new();
    let mut passes = 0_usize;

    loop {
        passes += 1;
        let nodes: Vec<NodeIndex> = progress.keys().copied().collect();

        for node in nodes {
            for dependency in graph.dependencies(node) {
                progress.entry(dependency).or_insert(Progress::Pending);
            }
            if progress[&node].is_complete() {
                continue;
            }

            let ready = graph
                .dependencies(node)
                .all(|dependency| progress[&dependency].is_complete());

            let mut step = graph.step(node).borrow_mut();
            let outcome = if step.is_ini() {
                step.poll()
            } else if ready {
                trace!(step = step.name(), "starting step");
                step.initialize().and_then(|()| step.poll())
            } else {
                continue;
            };

            let next = match outcome {
                Ok(StepState::Run) => Progress::Done,
                Ok(StepState::Error) => {
                    let name = step.name().to_owned();
                    failures.push(StepFailure {
                        source: StepError::Failed(name.clone()),
                        step: name,
                    });
                    Progress::Errored
                }
                Ok(StepState::Uninitialized | StepState::Polling) => Progress::Running,
                Err(source) => {
                    failures.push(StepFailure {
                        step: step.name().to_owned(),
                        source,
                    });
                    Progress::Errored
                }
            };
            progress.insert(node, next);
        }

        if progress.values().all(|p| p.is_complete()) {
            break;
        }
        thread::sleep(wait);
    }

    debug!(steps = progress.len(), passes, failed = failures.len(), "graph drained");
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Evaluations { failures })
    }
}
