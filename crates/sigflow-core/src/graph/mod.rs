//! Typed dataflow graph: mutation API, type checking and instance dependencies.
//!
//! [`Graph`] owns the vertices, the typed edges between them, and a coarser
//! [`ExecutionInstanceGraph`] that records which execution instances consume
//! data produced by which others.
//!
//! # Architecture
//!
//! ```text
//!  vertices (arena)        edges (tombstoned)       instance graph
//!  ┌──────────────┐        ┌───────────────┐        ┌──────┐
//!  │ v0  EI(0,..) │──e0───►│ v0 → v1  [r]  │        │ EI 0 │
//!  │ v1  EI(0,..) │        │ v1 → v2       │──────► │  │   │
//!  │ v2  EI(1,..) │──e1───►│ ...           │        │  ▼   │
//!  └──────────────┘        └───────────────┘        │ EI 1 │
//!                                                   └──────┘
//! ```
//!
//! Every mutation validates before it touches any state, so a failed call
//! leaves the graph exactly as it was. The checks run in a fixed order:
//! input count, port shape and type, source acceptance, execution instance
//! legality, instance graph acyclicity.

mod execution_instance_graph;
mod serialization;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::execution_instance::ExecutionInstanceId;
use crate::port::{Port, PortRestriction};
use crate::vertex::Vertex;

pub use execution_instance_graph::ExecutionInstanceGraph;

/// Identifier of a vertex in a [`Graph`].
///
/// Identifiers are assigned sequentially and never reused within a graph.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VertexId(pub(crate) u32);

impl VertexId {
    /// Raw index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VertexId({})", self.0)
    }
}

/// Identifier of an edge in a [`Graph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub(crate) u32);

impl EdgeId {
    /// Raw index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Input of a vertex: a source vertex and optionally the used sub-range of
/// its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Source vertex.
    pub descriptor: VertexId,
    /// Used sub-range of the source output.
    pub port_restriction: Option<PortRestriction>,
}

impl Input {
    /// Input using the sub-range `restriction` of `descriptor`.
    pub fn restricted(descriptor: VertexId, restriction: PortRestriction) -> Self {
        Self {
            descriptor,
            port_restriction: Some(restriction),
        }
    }
}

impl From<VertexId> for Input {
    fn from(descriptor: VertexId) -> Self {
        Self {
            descriptor,
            port_restriction: None,
        }
    }
}

/// Directed, typed connection between two vertices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Producing vertex.
    pub source: VertexId,
    /// Consuming vertex.
    pub target: VertexId,
    /// Used sub-range of the source output.
    pub port_restriction: Option<PortRestriction>,
}

#[derive(Clone, Debug)]
struct VertexData {
    vertex: Vertex,
    execution_instance: ExecutionInstanceId,
    /// Edges in input-port order.
    incoming: Vec<EdgeId>,
    outgoing: Vec<EdgeId>,
}

/// Dataflow graph of hardware and host vertices placed on execution instances.
#[derive(Clone, Debug)]
pub struct Graph {
    vertices: Vec<VertexData>,
    edges: Vec<Option<Edge>>,
    execution_instance_graph: ExecutionInstanceGraph,
    vertices_per_instance: BTreeMap<ExecutionInstanceId, Vec<VertexId>>,
    enable_acyclicity_check: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Port of `vertex` connected at input position `index`.
fn input_port(vertex: &Vertex, ports: &[Port], index: usize) -> Option<Port> {
    let index = if vertex.variadic_input() {
        index.min(ports.len().checked_sub(1)?)
    } else {
        index
    };
    ports.get(index).copied()
}

fn check_arity(vertex: &Vertex, ports: &[Port], got: usize) -> Result<()> {
    if vertex.variadic_input() {
        if ports.is_empty() {
            return Err(GraphError::VariadicWithoutPorts(vertex.name()));
        }
        if got < ports.len() {
            return Err(GraphError::TooFewInputs {
                kind: vertex.name(),
                minimum: ports.len(),
                got,
            });
        }
    } else if got != ports.len() {
        return Err(GraphError::InputCount {
            kind: vertex.name(),
            expected: ports.len(),
            got,
        });
    }
    Ok(())
}

fn check_port(
    target: &Vertex,
    ports: &[Port],
    index: usize,
    source: &Vertex,
    restriction: Option<&PortRestriction>,
) -> Result<()> {
    let provided = source.output();
    let provided = match restriction {
        Some(r) if !r.is_restriction_of(&provided) => {
            return Err(GraphError::InvalidRestriction {
                index,
                source_port: provided,
            });
        }
        Some(r) => Port::new(r.size(), provided.connection_type),
        None => provided,
    };
    let Some(expected) = input_port(target, ports, index) else {
        return Err(GraphError::InputCount {
            kind: target.name(),
            expected: ports.len(),
            got: index + 1,
        });
    };
    if provided != expected {
        return Err(GraphError::PortMismatch {
            index,
            provided,
            expected,
        });
    }
    Ok(())
}

fn check_supported(
    target: &Vertex,
    index: usize,
    source: &Vertex,
    restriction: Option<&PortRestriction>,
) -> Result<()> {
    if target.supports_input_from(source, restriction) {
        Ok(())
    } else {
        Err(GraphError::UnsupportedInput {
            index,
            source_kind: source.name(),
            target: target.name(),
        })
    }
}

fn check_execution_instances(
    target: &Vertex,
    target_ei: ExecutionInstanceId,
    index: usize,
    source: &Vertex,
    source_ei: ExecutionInstanceId,
) -> Result<()> {
    let connection_type = source.output().connection_type;
    if connection_type.can_cross_execution_instances()
        && source.can_connect_different_execution_instances()
        && target.can_connect_different_execution_instances()
    {
        if source_ei == target_ei {
            return Err(GraphError::MustCrossExecutionInstances {
                index,
                connection_type,
            });
        }
    } else if source_ei != target_ei {
        return Err(GraphError::CannotCrossExecutionInstances {
            index,
            connection_type,
        });
    }
    Ok(())
}

impl Graph {
    /// Creates an empty graph.
    ///
    /// With `enable_acyclicity_check`, additions closing a cycle in the
    /// execution instance graph are rejected.
    pub fn new(enable_acyclicity_check: bool) -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            execution_instance_graph: ExecutionInstanceGraph::default(),
            vertices_per_instance: BTreeMap::new(),
            enable_acyclicity_check,
        }
    }

    /// Whether cycle checking is enabled.
    pub fn enable_acyclicity_check(&self) -> bool {
        self.enable_acyclicity_check
    }

    fn data(&self, id: VertexId) -> Result<&VertexData> {
        self.vertices
            .get(id.0 as usize)
            .ok_or(GraphError::VertexNotFound(id))
    }

    fn edge(&self, id: EdgeId) -> &Edge {
        // Adjacency lists only hold live edges.
        self.edges[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| unreachable!("adjacency references removed edge {}", id.0))
    }

    /// Validates `inputs` for `vertex` placed on `execution_instance`.
    fn check_inputs(
        &self,
        vertex: &Vertex,
        execution_instance: ExecutionInstanceId,
        inputs: &[Input],
    ) -> Result<()> {
        let ports = vertex.inputs();
        check_arity(vertex, &ports, inputs.len())?;

        let sources = inputs
            .iter()
            .map(|i| self.data(i.descriptor))
            .collect::<Result<Vec<_>>>()?;

        for (index, (input, source)) in inputs.iter().zip(&sources).enumerate() {
            check_port(
                vertex,
                &ports,
                index,
                &source.vertex,
                input.port_restriction.as_ref(),
            )?;
        }
        for (index, (input, source)) in inputs.iter().zip(&sources).enumerate() {
            check_supported(vertex, index, &source.vertex, input.port_restriction.as_ref())?;
        }
        for (index, source) in sources.iter().enumerate() {
            check_execution_instances(
                vertex,
                execution_instance,
                index,
                &source.vertex,
                source.execution_instance,
            )?;
        }
        Ok(())
    }

    /// Validates the consumers of `id` against `replacement` as their source.
    fn check_outputs(&self, id: VertexId, replacement: &Vertex) -> Result<()> {
        let data = self.data(id)?;
        for &edge_id in &data.outgoing {
            let edge = self.edge(edge_id);
            let target = self.data(edge.target)?;
            let Some(index) = target.incoming.iter().position(|&e| e == edge_id) else {
                continue;
            };
            let ports = target.vertex.inputs();
            let restriction = edge.port_restriction.as_ref();
            check_port(&target.vertex, &ports, index, replacement, restriction)?;
            check_supported(&target.vertex, index, replacement, restriction)?;
            check_execution_instances(
                &target.vertex,
                target.execution_instance,
                index,
                replacement,
                data.execution_instance,
            )?;
        }
        Ok(())
    }

    /// Instance edges `inputs` would add for a vertex on `execution_instance`.
    fn new_instance_edges(
        &self,
        execution_instance: ExecutionInstanceId,
        inputs: &[Input],
    ) -> Result<BTreeSet<ExecutionInstanceId>> {
        let mut sources = BTreeSet::new();
        for input in inputs {
            let ei = self.data(input.descriptor)?.execution_instance;
            if ei != execution_instance
                && !self
                    .execution_instance_graph
                    .contains_edge(ei, execution_instance)
            {
                sources.insert(ei);
            }
        }
        Ok(sources)
    }

    /// Adds `vertex` on `execution_instance` fed by `inputs`, in port order.
    ///
    /// # Errors
    ///
    /// Any failed check; the graph is left unchanged.
    pub fn add(
        &mut self,
        vertex: impl Into<Vertex>,
        execution_instance: ExecutionInstanceId,
        inputs: impl IntoIterator<Item = Input>,
    ) -> Result<VertexId> {
        let vertex = vertex.into();
        let inputs: Vec<Input> = inputs.into_iter().collect();
        self.check_inputs(&vertex, execution_instance, &inputs)?;

        let new_sources = self.new_instance_edges(execution_instance, &inputs)?;
        if self.enable_acyclicity_check && !new_sources.is_empty() {
            let mut probe = self.execution_instance_graph.clone();
            for &source in &new_sources {
                probe.add_edge(source, execution_instance);
            }
            if !probe.is_acyclic() {
                return Err(GraphError::CyclicExecutionInstanceGraph);
            }
        }

        let id = VertexId(u32::try_from(self.vertices.len()).unwrap_or(u32::MAX));
        self.vertices.push(VertexData {
            vertex,
            execution_instance,
            incoming: Vec::with_capacity(inputs.len()),
            outgoing: Vec::new(),
        });
        self.execution_instance_graph.add_node(execution_instance);
        self.vertices_per_instance
            .entry(execution_instance)
            .or_default()
            .push(id);
        for input in inputs {
            self.connect(input, id);
        }
        tracing::trace!(vertex = %id, %execution_instance, "graph: added vertex");
        Ok(id)
    }

    /// Inserts an edge without validation.
    fn connect(&mut self, input: Input, target: VertexId) {
        let edge_id = EdgeId(u32::try_from(self.edges.len()).unwrap_or(u32::MAX));
        self.edges.push(Some(Edge {
            source: input.descriptor,
            target,
            port_restriction: input.port_restriction,
        }));
        self.vertices[input.descriptor.0 as usize]
            .outgoing
            .push(edge_id);
        self.vertices[target.0 as usize].incoming.push(edge_id);

        let source_ei = self.vertices[input.descriptor.0 as usize].execution_instance;
        let target_ei = self.vertices[target.0 as usize].execution_instance;
        if source_ei != target_ei {
            self.execution_instance_graph.add_edge(source_ei, target_ei);
        }
    }

    /// Replaces the vertex value of `id`, keeping its edges.
    ///
    /// # Errors
    ///
    /// The replacement must accept the existing inputs and be accepted by
    /// every consumer; otherwise the graph is left unchanged.
    pub fn update(&mut self, id: VertexId, vertex: impl Into<Vertex>) -> Result<()> {
        let vertex = vertex.into();
        let data = self.data(id)?;
        let inputs: Vec<Input> = data
            .incoming
            .iter()
            .map(|&e| {
                let edge = self.edge(e);
                Input {
                    descriptor: edge.source,
                    port_restriction: edge.port_restriction,
                }
            })
            .collect();
        self.check_inputs(&vertex, data.execution_instance, &inputs)?;
        self.check_outputs(id, &vertex)?;
        self.vertices[id.0 as usize].vertex = vertex;
        Ok(())
    }

    /// Replaces the vertex value of `id` and its inputs.
    ///
    /// # Errors
    ///
    /// Any failed check, including an input that depends on `id`; the graph
    /// is restored to its prior state.
    pub fn update_and_relocate(
        &mut self,
        id: VertexId,
        vertex: impl Into<Vertex>,
        inputs: impl IntoIterator<Item = Input>,
    ) -> Result<()> {
        let backup = self.clone();
        let result = self.relocate(id, vertex.into(), inputs.into_iter().collect());
        if result.is_err() {
            *self = backup;
        }
        result
    }

    fn relocate(&mut self, id: VertexId, vertex: Vertex, inputs: Vec<Input>) -> Result<()> {
        let execution_instance = self.data(id)?.execution_instance;
        self.check_inputs(&vertex, execution_instance, &inputs)?;
        self.check_outputs(id, &vertex)?;
        for input in &inputs {
            if self.can_reach(id, input.descriptor) {
                return Err(GraphError::CyclicVertexGraph(id));
            }
        }

        let old = std::mem::take(&mut self.vertices[id.0 as usize].incoming);
        for edge_id in old {
            if let Some(edge) = self.edges[edge_id.0 as usize].take() {
                self.vertices[edge.source.0 as usize]
                    .outgoing
                    .retain(|&e| e != edge_id);
            }
        }
        self.vertices[id.0 as usize].vertex = vertex;
        for input in inputs {
            self.connect(input, id);
        }
        self.rebuild_execution_instance_graph();

        if self.enable_acyclicity_check && !self.execution_instance_graph.is_acyclic() {
            return Err(GraphError::CyclicExecutionInstanceGraph);
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` along edges, including `from == to`.
    fn can_reach(&self, from: VertexId, to: VertexId) -> bool {
        let mut visited = vec![false; self.vertices.len()];
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            let idx = current.0 as usize;
            if idx >= visited.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;
            for &edge_id in &self.vertices[idx].outgoing {
                stack.push(self.edge(edge_id).target);
            }
        }
        false
    }

    fn rebuild_execution_instance_graph(&mut self) {
        let mut graph = ExecutionInstanceGraph::default();
        for data in &self.vertices {
            graph.add_node(data.execution_instance);
        }
        for edge in self.edges.iter().flatten() {
            let source = self.vertices[edge.source.0 as usize].execution_instance;
            let target = self.vertices[edge.target.0 as usize].execution_instance;
            if source != target {
                graph.add_edge(source, target);
            }
        }
        self.execution_instance_graph = graph;
    }

    /// Vertex value of `id`.
    pub fn vertex_property(&self, id: VertexId) -> Result<&Vertex> {
        Ok(&self.data(id)?.vertex)
    }

    /// Execution instance of `id`.
    pub fn execution_instance_of(&self, id: VertexId) -> Result<ExecutionInstanceId> {
        Ok(self.data(id)?.execution_instance)
    }

    /// Execution instance of every vertex.
    pub fn execution_instance_map(&self) -> BTreeMap<VertexId, ExecutionInstanceId> {
        self.vertex_ids()
            .zip(&self.vertices)
            .map(|(id, d)| (id, d.execution_instance))
            .collect()
    }

    /// Vertices of every execution instance, in insertion order.
    pub fn vertex_descriptor_map(&self) -> &BTreeMap<ExecutionInstanceId, Vec<VertexId>> {
        &self.vertices_per_instance
    }

    /// Port restriction of every live edge.
    pub fn edge_property_map(&self) -> BTreeMap<EdgeId, Option<PortRestriction>> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                let e = e.as_ref()?;
                Some((EdgeId(u32::try_from(i).ok()?), e.port_restriction))
            })
            .collect()
    }

    /// Edges into `id`, in input-port order.
    pub fn in_edges(&self, id: VertexId) -> Result<Vec<Edge>> {
        Ok(self
            .data(id)?
            .incoming
            .iter()
            .map(|&e| *self.edge(e))
            .collect())
    }

    /// Edges out of `id`.
    pub fn out_edges(&self, id: VertexId) -> Result<Vec<Edge>> {
        Ok(self
            .data(id)?
            .outgoing
            .iter()
            .map(|&e| *self.edge(e))
            .collect())
    }

    /// Instance dependency graph.
    pub fn execution_instance_graph(&self) -> &ExecutionInstanceGraph {
        &self.execution_instance_graph
    }

    /// Whether the instance dependency graph has no cycle.
    pub fn is_acyclic_execution_instance_graph(&self) -> bool {
        self.execution_instance_graph.is_acyclic()
    }

    /// All execution instances, ascending.
    pub fn execution_instances(&self) -> Vec<ExecutionInstanceId> {
        self.execution_instance_graph.nodes().collect()
    }

    /// Vertices placed on `execution_instance`.
    pub fn vertices_of(&self, execution_instance: ExecutionInstanceId) -> &[VertexId] {
        self.vertices_per_instance
            .get(&execution_instance)
            .map_or(&[], Vec::as_slice)
    }

    /// Vertices of `execution_instance` ordered so every vertex follows its
    /// same-instance sources.
    pub fn local_topological_order(&self, execution_instance: ExecutionInstanceId) -> Vec<VertexId> {
        let local = self.vertices_of(execution_instance);
        let mut in_degree: BTreeMap<VertexId, usize> = local
            .iter()
            .map(|&v| {
                let degree = self.vertices[v.0 as usize]
                    .incoming
                    .iter()
                    .filter(|&&e| {
                        let source = self.edge(e).source;
                        self.vertices[source.0 as usize].execution_instance == execution_instance
                    })
                    .count();
                (v, degree)
            })
            .collect();

        let mut ready: BTreeSet<VertexId> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&v, _)| v)
            .collect();

        let mut sorted = Vec::with_capacity(local.len());
        while let Some(v) = ready.pop_first() {
            sorted.push(v);
            for &edge_id in &self.vertices[v.0 as usize].outgoing {
                let target = self.edge(edge_id).target;
                if let Some(d) = in_degree.get_mut(&target) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(target);
                    }
                }
            }
        }
        sorted
    }

    /// All vertex identifiers, ascending.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + use<> {
        (0..u32::try_from(self.vertices.len()).unwrap_or(u32::MAX)).map(VertexId)
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of live edges.
    pub fn num_edges(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    /// Edges in canonical order: per target vertex, in input-port order.
    fn canonical_edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.vertices
            .iter()
            .flat_map(|d| d.incoming.iter().map(|&e| *self.edge(e)))
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.enable_acyclicity_check == other.enable_acyclicity_check
            && self.vertices.len() == other.vertices.len()
            && self.vertices.iter().zip(&other.vertices).all(|(a, b)| {
                a.vertex == b.vertex && a.execution_instance == b.execution_instance
            })
            && self.canonical_edges().eq(other.canonical_edges())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_type::ConnectionType;
    use crate::vertex::{DataInput, DataOutput, ExternalInput};

    fn ei(step: u32) -> ExecutionInstanceId {
        ExecutionInstanceId::step(step)
    }

    fn external(size: usize) -> ExternalInput {
        ExternalInput::new(ConnectionType::DataInt8, size).unwrap()
    }

    fn data_input(size: usize) -> DataInput {
        DataInput::new(ConnectionType::Int8, size).unwrap()
    }

    fn data_output(size: usize) -> DataOutput {
        DataOutput::new(ConnectionType::Int8, size).unwrap()
    }

    #[test]
    fn restriction_selects_sub_range() {
        let mut g = Graph::default();
        let ext = g.add(external(10), ei(0), []).unwrap();
        let err = g
            .add(data_input(4), ei(0), [Input::restricted(ext, PortRestriction::new(8, 11))])
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidRestriction { .. }));
        let id = g
            .add(data_input(4), ei(0), [Input::restricted(ext, PortRestriction::new(2, 5))])
            .unwrap();
        let edges = g.in_edges(id).unwrap();
        assert_eq!(edges[0].port_restriction, Some(PortRestriction::new(2, 5)));
        assert_eq!(g.out_edges(ext).unwrap().len(), 1);
    }

    #[test]
    fn failed_add_leaves_graph_unchanged() {
        let mut g = Graph::default();
        let ext = g.add(external(3), ei(0), []).unwrap();
        let before = g.clone();
        assert!(g.add(data_input(4), ei(0), [ext.into()]).is_err());
        assert_eq!(g, before);
        assert_eq!(g.num_vertices(), 1);
        assert_eq!(g.num_edges(), 0);
    }

    #[test]
    fn data_crosses_instances_and_records_dependency() {
        let mut g = Graph::default();
        let ext = g.add(external(3), ei(0), []).unwrap();
        let input = g.add(data_input(3), ei(0), [ext.into()]).unwrap();
        let out = g.add(data_output(3), ei(0), [input.into()]).unwrap();

        let err = g.add(data_input(3), ei(0), [out.into()]).unwrap_err();
        assert!(matches!(err, GraphError::MustCrossExecutionInstances { .. }));

        let next = g.add(data_input(3), ei(1), [out.into()]).unwrap();
        assert!(g.execution_instance_graph().contains_edge(ei(0), ei(1)));
        assert_eq!(g.vertices_of(ei(1)), &[next]);
        assert_eq!(g.execution_instances(), vec![ei(0), ei(1)]);
        assert_eq!(g.local_topological_order(ei(0)), vec![ext, input, out]);
    }

    #[test]
    fn update_checks_consumers() {
        let mut g = Graph::default();
        let ext = g.add(external(3), ei(0), []).unwrap();
        let input = g.add(data_input(3), ei(0), [ext.into()]).unwrap();
        let _out = g.add(data_output(3), ei(0), [input.into()]).unwrap();

        // A resized data input no longer matches its source.
        assert!(g.update(input, data_input(4)).is_err());
        assert_eq!(
            g.vertex_property(input).unwrap(),
            &Vertex::from(data_input(3))
        );
        g.update(ext, external(3)).unwrap();
    }

    #[test]
    fn relocate_rejects_self_dependency() {
        let mut g = Graph::default();
        let ext = g.add(external(3), ei(0), []).unwrap();
        let a = g.add(data_input(3), ei(0), [ext.into()]).unwrap();
        let out = g.add(data_output(3), ei(0), [a.into()]).unwrap();
        let b = g.add(data_input(3), ei(1), [out.into()]).unwrap();
        let before = g.clone();

        let ext2 = ExternalInput::new(ConnectionType::DataInt8, 3).unwrap();
        let err = g.update_and_relocate(a, data_input(3), [out.into()]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::MustCrossExecutionInstances { .. } | GraphError::CyclicVertexGraph(_)
        ));
        assert_eq!(g, before);

        let ext_b = g.add(ext2, ei(1), []).unwrap();
        g.update_and_relocate(b, data_input(3), [ext_b.into()]).unwrap();
        assert!(!g.execution_instance_graph().contains_edge(ei(0), ei(1)));
        assert_eq!(g.in_edges(b).unwrap()[0].source, ext_b);
    }
}
