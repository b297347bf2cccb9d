//! Fixtures shared by the execution integration tests.
//!
//! Executors run against simulated connections; graphs are the small
//! topologies experiments are built from.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use sigflow_backend::{SimulatedConnection, SimulationHandle, SimulationOptions, StatefulConnection};
use sigflow_core::vertex::{
    CadcMembraneReadoutView, CadcMode, CrossbarL2Input, CrossbarL2Output, CrossbarNode, DataInput,
    DataOutput, ExternalInput, NeuronView, NeuronViewConfig, Transformation,
    TransformationFunction,
};
use sigflow_core::{ConnectionType, DataSnippet, ExecutionInstanceId, Graph, Input, VertexId};
use sigflow_exec::{ChipConfigs, JitGraphExecutor};
use sigflow_hw::chip::{CrossbarNodeConfig, ReadoutSource};
use sigflow_hw::coord::{CrossbarInput, CrossbarNodeOnDls, CrossbarOutput, Hemisphere, L2Channel, NeuronColumn};
use sigflow_hw::{
    Chip, ChipOnConnection, ChipOnExecutor, ConnectionOnExecutor, FpgaTime, HardwareParameters,
};

pub fn ei(step: u32, connection: u32) -> ExecutionInstanceId {
    ExecutionInstanceId::new(
        step,
        ChipOnExecutor::new(ConnectionOnExecutor(connection), ChipOnConnection(0)),
    )
}

/// Executor over `n` simulated connections with the given round-trip latency.
pub fn executor(n: u32, latency: Duration) -> (JitGraphExecutor, Vec<SimulationHandle>) {
    let mut connections = BTreeMap::new();
    let mut handles = Vec::new();
    for id in 0..n {
        let connection = SimulatedConnection::new(SimulationOptions {
            identifier: format!("sim-{id}"),
            round_trip_latency: latency,
            ..SimulationOptions::default()
        });
        handles.push(connection.handle());
        connections.insert(
            ConnectionOnExecutor(id),
            StatefulConnection::new(connection, true, HardwareParameters::default()),
        );
    }
    (JitGraphExecutor::new(connections), handles)
}

/// Default chip for every execution instance of `graph`.
pub fn default_configs(graph: &Graph) -> ChipConfigs {
    graph
        .execution_instances()
        .into_iter()
        .map(|ei| (ei, Chip::default()))
        .collect()
}

/// Runtime of `time` cycles for `ei`, repeated for `batch` entries.
pub fn runtime(
    ei: ExecutionInstanceId,
    time: u64,
    batch: usize,
) -> Vec<BTreeMap<ExecutionInstanceId, FpgaTime>> {
    vec![BTreeMap::from([(ei, FpgaTime(time))]); batch]
}

/// Spikes sent on L2 channel 0 come back through a pass-all crossbar node.
///
/// Returns the external input and the data output vertex.
pub fn spike_loop(graph: &mut Graph, ei: ExecutionInstanceId) -> (VertexId, VertexId) {
    let ext = graph
        .add(
            ExternalInput::new(ConnectionType::DataTimedSpikeToChipSequence, 1).unwrap(),
            ei,
            [],
        )
        .unwrap();
    let input = graph
        .add(
            DataInput::new(ConnectionType::TimedSpikeToChipSequence, 1).unwrap(),
            ei,
            [Input::from(ext)],
        )
        .unwrap();
    let l2_input = graph.add(CrossbarL2Input, ei, [Input::from(input)]).unwrap();
    let node = graph
        .add(
            CrossbarNode::new(
                CrossbarNodeOnDls::new(
                    CrossbarInput::from_l2(L2Channel::new(0)),
                    CrossbarOutput::from_l2(L2Channel::new(0)),
                ),
                CrossbarNodeConfig::PASS_ALL,
            ),
            ei,
            [Input::from(l2_input)],
        )
        .unwrap();
    let l2_output = graph.add(CrossbarL2Output, ei, [Input::from(node)]).unwrap();
    let output = graph
        .add(
            DataOutput::new(ConnectionType::TimedSpikeFromChipSequence, 1).unwrap(),
            ei,
            [Input::from(l2_output)],
        )
        .unwrap();
    (ext, output)
}

/// External Int8 vector forwarded at `ei` and rectified at `next`.
///
/// Returns the external input, the forwarding output and the ReLU.
pub fn host_chain(
    graph: &mut Graph,
    ei: ExecutionInstanceId,
    next: ExecutionInstanceId,
    size: usize,
) -> (VertexId, VertexId, VertexId) {
    let ext = graph
        .add(ExternalInput::new(ConnectionType::DataInt8, size).unwrap(), ei, [])
        .unwrap();
    let input = graph
        .add(DataInput::new(ConnectionType::Int8, size).unwrap(), ei, [Input::from(ext)])
        .unwrap();
    let output = graph
        .add(DataOutput::new(ConnectionType::Int8, size).unwrap(), ei, [Input::from(input)])
        .unwrap();
    let relu = Transformation::new(TransformationFunction::ConvertingRelu { size, shift: 2 }).unwrap();
    let relu = graph.add(relu, next, [Input::from(output)]).unwrap();
    (ext, output, relu)
}

/// Neurons `columns` of the top hemisphere.
pub fn neurons(graph: &mut Graph, ei: ExecutionInstanceId, columns: &[usize]) -> VertexId {
    let view = NeuronView::new(
        columns.iter().copied().map(NeuronColumn::new).collect(),
        vec![NeuronViewConfig::default(); columns.len()],
        Hemisphere::Top,
    )
    .unwrap();
    graph.add(view, ei, []).unwrap()
}

/// CADC readout of `columns` in `mode`; returns the data output.
pub fn cadc_readout(
    graph: &mut Graph,
    ei: ExecutionInstanceId,
    neurons: VertexId,
    columns: &[usize],
    mode: CadcMode,
) -> VertexId {
    let view = CadcMembraneReadoutView::new(
        vec![columns.iter().copied().map(NeuronColumn::new).collect()],
        Hemisphere::Top,
        mode,
        vec![vec![ReadoutSource::Membrane; columns.len()]],
    )
    .unwrap();
    let cadc = graph.add(view, ei, [Input::from(neurons)]).unwrap();
    graph
        .add(
            DataOutput::new(ConnectionType::Int8, columns.len()).unwrap(),
            ei,
            [Input::from(cadc)],
        )
        .unwrap()
}

/// Snippet carrying only runtimes.
pub fn runtime_only(ei: ExecutionInstanceId, time: u64, batch: usize) -> DataSnippet {
    DataSnippet {
        data: BTreeMap::new(),
        runtime: runtime(ei, time, batch),
    }
}
