//! Property-based tests for graph validation and batched data.
//!
//! Covers port typing of accepted edges, acyclicity of the execution
//! instance graph, cross-instance legality, serialization round trips and
//! batch-size validity of snippet containers.

use std::collections::BTreeMap;

use proptest::prelude::*;
use sigflow_core::vertex::{DataInput, DataOutput, ExternalInput};
use sigflow_core::{
    ConnectionType, DataEntry, DataSnippet, ExecutionInstanceId, Graph, GraphError, InputData,
    Input, OutputData, PortRestriction, TimedData, Vertex, VertexId,
};
use sigflow_hw::FpgaTime;

fn ei(step: u32) -> ExecutionInstanceId {
    ExecutionInstanceId::step(step)
}

/// Output port of `source`, narrowed by an optional restriction.
fn provided_port(graph: &Graph, source: VertexId, r: Option<PortRestriction>) -> (ConnectionType, usize) {
    let port = graph.vertex_property(source).unwrap().output();
    (port.connection_type, r.map_or(port.size, |r| r.size()))
}

/// Graph with one `DataOutput(Int8)` per step in `0..steps`, each fed locally.
fn per_step_outputs(graph: &mut Graph, steps: u32) -> Vec<VertexId> {
    (0..steps)
        .map(|step| {
            let ext = graph
                .add(ExternalInput::new(ConnectionType::DataInt8, 2).unwrap(), ei(step), [])
                .unwrap();
            let input = graph
                .add(DataInput::new(ConnectionType::Int8, 2).unwrap(), ei(step), [Input::from(ext)])
                .unwrap();
            graph
                .add(DataOutput::new(ConnectionType::Int8, 2).unwrap(), ei(step), [Input::from(input)])
                .unwrap()
        })
        .collect()
}

fn int8_entry(batch_size: usize) -> DataEntry {
    DataEntry::Int8(
        (0..batch_size)
            .map(|_| vec![TimedData::new(FpgaTime(0), vec![1i8, 2])])
            .collect(),
    )
}

fn snippet(ids: &[VertexId], sizes: &[usize], runtime: Option<usize>) -> DataSnippet {
    DataSnippet {
        data: ids.iter().copied().zip(sizes.iter().map(|&n| int8_entry(n))).collect(),
        runtime: runtime.map_or_else(Vec::new, |n| vec![BTreeMap::from([(ei(0), FpgaTime(10))]); n]),
    }
}

fn vertex_ids(n: usize) -> Vec<VertexId> {
    let mut graph = Graph::default();
    for _ in 0..n {
        graph
            .add(ExternalInput::new(ConnectionType::DataInt8, 2).unwrap(), ei(0), [])
            .unwrap();
    }
    graph.vertex_ids().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every accepted edge carries exactly the type and size its target port
    /// declares.
    #[test]
    fn accepted_edges_match_target_ports(
        source_size in 1usize..64,
        target_size in 1usize..64,
        offset in 0usize..64,
        restrict in any::<bool>(),
    ) {
        let mut graph = Graph::default();
        let ext = graph
            .add(ExternalInput::new(ConnectionType::DataInt8, source_size).unwrap(), ei(0), [])
            .unwrap();
        let restriction = restrict.then(|| PortRestriction::new(offset, offset + target_size - 1));
        let input = Input { descriptor: ext, port_restriction: restriction };

        let result = graph.add(DataInput::new(ConnectionType::Int8, target_size).unwrap(), ei(0), [input]);
        let fits = match restriction {
            Some(r) => r.max < source_size,
            None => source_size == target_size,
        };
        prop_assert_eq!(result.is_ok(), fits);

        if let Ok(id) = result {
            let edge = graph.in_edges(id).unwrap()[0];
            let (connection_type, size) = provided_port(&graph, edge.source, edge.port_restriction);
            let expected = &graph.vertex_property(id).unwrap().inputs()[0];
            prop_assert_eq!(connection_type, expected.connection_type);
            prop_assert_eq!(size, expected.size);
        }
    }

    /// With the check enabled, no sequence of additions produces an instance
    /// cycle; rejected additions leave the graph untouched.
    #[test]
    fn instance_graph_stays_acyclic(
        links in prop::collection::vec((0u32..5, 0u32..5), 1..20),
    ) {
        let mut graph = Graph::default();
        let outputs = per_step_outputs(&mut graph, 5);

        for (from, to) in links {
            let before = graph.clone();
            let result = graph.add(
                DataInput::new(ConnectionType::Int8, 2).unwrap(),
                ei(to),
                [Input::from(outputs[from as usize])],
            );
            match result {
                Ok(_) => prop_assert!(from != to),
                Err(GraphError::MustCrossExecutionInstances { .. }) => prop_assert_eq!(from, to),
                Err(GraphError::CyclicExecutionInstanceGraph) => prop_assert_eq!(&graph, &before),
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
            prop_assert!(graph.is_acyclic_execution_instance_graph());
        }
    }

    /// An edge between instances succeeds iff the source type is host data
    /// and both vertices allow crossing; otherwise only same-instance edges
    /// succeed.
    #[test]
    fn cross_instance_legality(
        source_kind in 0usize..3,
        target_step in 0u32..2,
    ) {
        let mut graph = Graph::default();
        let ext = graph
            .add(ExternalInput::new(ConnectionType::DataInt8, 2).unwrap(), ei(0), [])
            .unwrap();
        let input = graph
            .add(DataInput::new(ConnectionType::Int8, 2).unwrap(), ei(0), [Input::from(ext)])
            .unwrap();
        let output = graph
            .add(DataOutput::new(ConnectionType::Int8, 2).unwrap(), ei(0), [Input::from(input)])
            .unwrap();

        // (source, consuming vertex)
        let (source, target): (VertexId, Vertex) = match source_kind {
            0 => (ext, DataInput::new(ConnectionType::Int8, 2).unwrap().into()),
            1 => (input, DataOutput::new(ConnectionType::Int8, 2).unwrap().into()),
            _ => (output, DataInput::new(ConnectionType::Int8, 2).unwrap().into()),
        };
        let source_vertex = graph.vertex_property(source).unwrap().clone();
        let crossable = source_vertex.output().connection_type.can_cross_execution_instances()
            && source_vertex.can_connect_different_execution_instances()
            && target.can_connect_different_execution_instances();
        let differs = target_step != 0;

        let result = graph.add(target, ei(target_step), [Input::from(source)]);
        prop_assert_eq!(result.is_ok(), crossable == differs);
    }

    /// Serializing and deserializing reproduces the graph.
    #[test]
    fn json_roundtrip_preserves_graph(
        steps in 1u32..4,
        links in prop::collection::vec((0u32..4, 0u32..4), 0..8),
        check in any::<bool>(),
    ) {
        let mut graph = Graph::new(check);
        let outputs = per_step_outputs(&mut graph, steps);
        for (from, to) in links {
            let from = from % steps;
            let _ = graph.add(
                DataInput::new(ConnectionType::Int8, 2).unwrap(),
                ei(to),
                [Input::from(outputs[from as usize])],
            );
        }
        let back = Graph::from_json(&graph.to_json().unwrap()).unwrap();
        prop_assert_eq!(&back, &graph);
        prop_assert_eq!(back.execution_instance_graph(), graph.execution_instance_graph());
    }

    /// Snippets are valid iff all entries and the runtime agree on the batch
    /// size; `batch_size` fails exactly when invalid.
    #[test]
    fn batch_size_validity(
        sizes in prop::collection::vec(0usize..4, 0..5),
        runtime in prop::option::of(0usize..4),
    ) {
        let ids = vertex_ids(sizes.len());
        let snippet = snippet(&ids, &sizes, runtime);
        let all_sizes: Vec<usize> = sizes
            .iter()
            .copied()
            .chain(runtime.filter(|&n| n > 0))
            .collect();
        let consistent = all_sizes.windows(2).all(|w| w[0] == w[1]);

        prop_assert_eq!(snippet.valid(), consistent);
        prop_assert_eq!(snippet.batch_size().is_ok(), consistent);

        let input = InputData::from_snippet(snippet.clone());
        prop_assert_eq!(input.valid(), consistent);
        prop_assert_eq!(input.batch_size().is_err(), !consistent);

        let output = OutputData { snippets: vec![snippet], ..OutputData::default() };
        prop_assert_eq!(output.valid(), consistent);
        if consistent {
            prop_assert_eq!(output.batch_size().unwrap(), all_sizes.first().copied().unwrap_or(0));
        }
    }
}
