//! Dependency graph over execution instances.

use std::collections::{BTreeMap, BTreeSet};

use crate::execution_instance::ExecutionInstanceId;

/// Directed graph whose nodes are execution instances.
///
/// An edge `a → b` means `b` consumes host data produced by `a`. Parallel
/// vertex edges collapse into one instance edge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionInstanceGraph {
    successors: BTreeMap<ExecutionInstanceId, BTreeSet<ExecutionInstanceId>>,
    predecessors: BTreeMap<ExecutionInstanceId, BTreeSet<ExecutionInstanceId>>,
}

impl ExecutionInstanceGraph {
    /// Inserts a node; no-op when present.
    pub fn add_node(&mut self, node: ExecutionInstanceId) {
        self.successors.entry(node).or_default();
        self.predecessors.entry(node).or_default();
    }

    /// Inserts an edge and both endpoints.
    pub fn add_edge(&mut self, from: ExecutionInstanceId, to: ExecutionInstanceId) {
        self.add_node(from);
        self.add_node(to);
        self.successors.entry(from).or_default().insert(to);
        self.predecessors.entry(to).or_default().insert(from);
    }

    /// Whether `from → to` exists.
    pub fn contains_edge(&self, from: ExecutionInstanceId, to: ExecutionInstanceId) -> bool {
        self.successors.get(&from).is_some_and(|s| s.contains(&to))
    }

    /// All nodes, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = ExecutionInstanceId> + '_ {
        self.successors.keys().copied()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.successors.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// Direct successors of `node`.
    pub fn successors(&self, node: ExecutionInstanceId) -> impl Iterator<Item = ExecutionInstanceId> + '_ {
        self.successors.get(&node).into_iter().flatten().copied()
    }

    /// Direct predecessors of `node`.
    pub fn predecessors(
        &self,
        node: ExecutionInstanceId,
    ) -> impl Iterator<Item = ExecutionInstanceId> + '_ {
        self.predecessors.get(&node).into_iter().flatten().copied()
    }

    /// Number of direct predecessors of `node`.
    pub fn in_degree(&self, node: ExecutionInstanceId) -> usize {
        self.predecessors.get(&node).map_or(0, BTreeSet::len)
    }

    /// Topological order via Kahn's algorithm; `None` if a cycle exists.
    ///
    /// Among ready nodes the smallest identifier is taken first, so the
    /// order is deterministic.
    pub fn topological_order(&self) -> Option<Vec<ExecutionInstanceId>> {
        let mut in_degree: BTreeMap<ExecutionInstanceId, usize> =
            self.nodes().map(|n| (n, self.in_degree(n))).collect();

        let mut ready: BTreeSet<ExecutionInstanceId> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();

        let mut sorted = Vec::with_capacity(self.len());
        while let Some(node) = ready.pop_first() {
            sorted.push(node);
            for next in self.successors(node) {
                if let Some(d) = in_degree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(next);
                    }
                }
            }
        }

        (sorted.len() == self.len()).then_some(sorted)
    }

    /// Whether the graph has no cycle.
    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ei(step: u32) -> ExecutionInstanceId {
        ExecutionInstanceId::step(step)
    }

    #[test]
    fn kahn_orders_dependencies_first() {
        let mut g = ExecutionInstanceGraph::default();
        g.add_edge(ei(2), ei(0));
        g.add_edge(ei(0), ei(1));
        g.add_node(ei(3));
        assert_eq!(g.topological_order().unwrap(), vec![ei(2), ei(0), ei(1), ei(3)]);
        assert_eq!(g.in_degree(ei(1)), 1);
        assert!(g.contains_edge(ei(2), ei(0)));
    }

    #[test]
    fn cycle_is_detected() {
        let mut g = ExecutionInstanceGraph::default();
        g.add_edge(ei(0), ei(1));
        g.add_edge(ei(1), ei(0));
        assert!(!g.is_acyclic());
        assert!(g.topological_order().is_none());
    }
}
