use std::collections::HashMap;

use fado_core::StepRef;
use petgraph::{
    Direction,
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};

use crate::Error;

/// Dependencies between evaluation steps.
///
/// Each step appears once no matter how many chains use it. An edge
/// `a → b` means `b` may only start once `a` has finished.
#[derive(Debug, Default)]
pub struct EvaluationGraph {
    graph: DiGraph<StepRef, ()>,
    node_map: HashMap<usize, NodeIndex>,
}

impl EvaluationGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the steps of a chain, each depending on the one before it.
    ///
    /// Edges already present are kept as they are.
    pub fn add_chain(&mut self, chain: &[StepRef]) {
        let mut previous = None;
        for step in chain {
            let node = self.get_or_add_step(step);
            if let Some(previous) = previous {
                self.graph.update_edge(previous, node, ());
            }
            previous = Some(node);
        }
    }

    /// Node of `step`, if it is in the graph.
    #[must_use]
    pub fn node(&self, step: &StepRef) -> Option<NodeIndex> {
        self.node_map.get(&step.key()).copied()
    }

    /// # Panics
    ///
    /// Panics if `node` is not part of this graph.
    #[must_use]
    pub fn step(&self, node: NodeIndex) -> &StepRef {
        &self.graph[node]
    }

    /// Nodes that must finish before `node` can start.
    pub fn dependencies(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Incoming)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the steps in an order that respects every dependency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CyclicDependency`] naming a step on a cycle.
    pub fn call_order(&self) -> Result<Vec<StepRef>, Error> {
        let order = toposort(&self.graph, None).map_err(|cycle| Error::CyclicDependency {
            step: self.graph[cycle.node_id()].name(),
        })?;
        Ok(order.into_iter().map(|node| self.graph[node].clone()).collect())
    }

    fn get_or_add_step(&mut self, step: &StepRef) -> NodeIndex {
        *self
            .node_map
            .entry(step.key())
            .or_insert_with(|| self.graph.add_node(step.clone()))
    }
}
