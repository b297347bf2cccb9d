//! File round trips of serialized graphs.

use std::fs::File;
use std::io::{BufReader, BufWriter};

use sigflow_core::vertex::plasticity_rule::{
    ElementType, NeuronLayout, NeuronViewShape, Observable, Recording, SynapseViewShape, Timer,
};
use sigflow_core::vertex::transformation::TransformationFunction;
use sigflow_core::vertex::{
    CadcMembraneReadoutView, CadcMode, DataInput, DataOutput, ExternalInput, PlasticityRule,
    Transformation,
};
use sigflow_core::{ConnectionType, ExecutionInstanceId, Graph, Input, Vertex};
use sigflow_hw::chip::ReadoutSource;
use sigflow_hw::coord::{Hemisphere, NeuronColumn};

fn two_step_graph() -> Graph {
    let mut graph = Graph::default();
    let first = ExecutionInstanceId::step(0);
    let second = ExecutionInstanceId::step(1);
    let third = ExecutionInstanceId::step(2);

    let ext = graph
        .add(ExternalInput::new(ConnectionType::DataInt8, 8).unwrap(), first, [])
        .unwrap();
    let input = graph
        .add(DataInput::new(ConnectionType::Int8, 8).unwrap(), first, [Input::from(ext)])
        .unwrap();
    let output = graph
        .add(DataOutput::new(ConnectionType::Int8, 8).unwrap(), first, [Input::from(input)])
        .unwrap();
    let argmax = Transformation::new(TransformationFunction::ArgMax {
        size: 8,
        connection_type: ConnectionType::DataInt8,
    })
    .unwrap();
    let argmax = graph.add(argmax, second, [Input::from(output)]).unwrap();
    graph
        .add(DataInput::new(ConnectionType::UInt32, 1).unwrap(), third, [Input::from(argmax)])
        .unwrap();
    graph
}

#[test]
fn graph_survives_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    let graph = two_step_graph();

    graph.write_json(BufWriter::new(File::create(&path).unwrap())).unwrap();
    let back = Graph::read_json(BufReader::new(File::open(&path).unwrap())).unwrap();

    assert_eq!(back, graph);
    assert_eq!(
        back.execution_instance_graph().topological_order(),
        graph.execution_instance_graph().topological_order()
    );
}

#[test]
fn truncated_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    let json = two_step_graph().to_json().unwrap();
    std::fs::write(&path, &json[..json.len() / 2]).unwrap();

    assert!(Graph::read_json(File::open(&path).unwrap()).is_err());
}

#[test]
fn hardware_vertices_keep_their_parameters() {
    let columns: Vec<NeuronColumn> = (0..2).map(NeuronColumn::new).collect();
    let readout = CadcMembraneReadoutView::new(
        vec![columns.clone()],
        Hemisphere::Bottom,
        CadcMode::Periodic,
        vec![vec![ReadoutSource::Membrane; 2]],
    )
    .unwrap();
    let rule = PlasticityRule::new(
        "void rule() {}".to_owned(),
        Timer { start: 10, period: 100, num_periods: 3 },
        vec![SynapseViewShape { num_rows: 1, columns: columns.clone(), hemisphere: Hemisphere::Top }],
        vec![NeuronViewShape {
            columns,
            row: Hemisphere::Top,
            neuron_readout_sources: vec![None, Some(ReadoutSource::Adaptation)],
        }],
        Some(Recording::Timed {
            observables: [(
                "v".to_owned(),
                Observable::PerNeuron {
                    element_type: ElementType::Int8,
                    layout: NeuronLayout::PackedActiveColumns,
                },
            )]
            .into(),
        }),
    )
    .unwrap();

    for vertex in [Vertex::from(readout), Vertex::from(rule)] {
        let json = serde_json::to_string(&vertex).unwrap();
        let back: Vertex = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vertex);
    }
}
