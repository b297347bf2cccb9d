//! End-to-end execution against simulated connections.
//!
//! Each test builds a small experiment graph, runs it through
//! [`JitGraphExecutor`] and checks the decoded results together with what
//! the simulated connections observed.

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sigflow_core::vertex::plasticity_rule::{
    ElementType, Observable, ObservableData, Recording, RecordingData, Timer,
};
use sigflow_core::vertex::{
    CadcMode, DataOutput, MadcReadoutView, MadcSource, PlasticityRule, SourceSelection,
};
use sigflow_core::{
    ConnectionType, DataEntry, DataSnippet, ExecutionInstanceHooks, Graph, Input, InputData,
    PpuSymbolValue, TimedData, Vertex, VertexId,
};
use sigflow_backend::SimulationHandle;
use sigflow_exec::{ExecutionError, Hooks, PpuProgram, PpuUsage};
use sigflow_hw::chip::{CrossbarNodeConfig, ReadoutSource};
use sigflow_hw::coord::{
    AtomicNeuron, CrossbarInput, CrossbarNodeOnDls, CrossbarOutput, Hemisphere, L2Channel,
    NeuronColumn,
};
use sigflow_hw::{Chip, FpgaTime, HardwareParameters, SpikeLabel, TimedSpikeToChip};

use common::*;

fn spikes(times: &[u64]) -> Vec<TimedSpikeToChip> {
    times
        .iter()
        .map(|&t| TimedSpikeToChip {
            time: FpgaTime(t),
            label: SpikeLabel(3),
        })
        .collect()
}

// ============================================================================
// Realtime data
// ============================================================================

#[test]
fn spikes_travel_through_the_chip_and_back() {
    let (executor, handles) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let (ext, output) = spike_loop(&mut graph, ei(0, 0));

    let mut snippet = DataSnippet::default();
    snippet.data.insert(
        ext,
        DataEntry::SpikesToChip(vec![spikes(&[10, 200, 400]), spikes(&[50])]),
    );
    snippet.runtime = runtime(ei(0, 0), 1000, 2);
    let result = executor
        .run_graph(
            &graph,
            &default_configs(&graph),
            &InputData::from_snippet(snippet),
            &Hooks::new(),
        )
        .unwrap();

    let DataEntry::SpikesFromChip(received) = &result.snippets[0].data[&output] else {
        panic!("spike output expected");
    };
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].len(), 3);
    assert_eq!(received[1].len(), 1);
    for (sent, got) in [10u64, 200, 400].iter().zip(&received[0]) {
        assert!(got.time.value() >= *sent);
        assert!(got.time.value() < 1000);
        assert_eq!(got.label, SpikeLabel(3));
    }
    assert!(!handles[0].runs().is_empty());
    assert!(result.pre_execution_chips.contains_key(&ei(0, 0)));
    assert!(
        result.time_info.realtime_duration_per_execution_instance[&ei(0, 0)]
            >= FpgaTime(2000).as_duration()
    );
}

#[test]
fn host_data_flows_between_execution_instances() {
    let (executor, _) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let (ext, forwarded, relu) = host_chain(&mut graph, ei(0, 0), ei(1, 0), 4);

    let mut snippet = DataSnippet::default();
    snippet.data.insert(
        ext,
        DataEntry::Int8(vec![vec![TimedData::new(FpgaTime::ZERO, vec![-8, 4, 12, 127])]]),
    );
    let result = executor
        .run_graph(
            &graph,
            &default_configs(&graph),
            &InputData::from_snippet(snippet),
            &Hooks::new(),
        )
        .unwrap();

    let data = &result.snippets[0].data;
    assert!(matches!(&data[&forwarded], DataEntry::Int8(v) if v[0][0].data == vec![-8, 4, 12, 127]));
    let DataEntry::UInt5(rectified) = &data[&relu] else {
        panic!("ReLU produces UInt5 data");
    };
    assert_eq!(rectified[0][0].data, vec![0, 1, 3, 31]);
}

#[test]
fn consecutive_columns_read_the_cadc_where_requested() {
    let (executor, _) = executor(1, Duration::ZERO);
    let columns = [0, 1, 2, 3];
    let mut graphs = Vec::new();
    let mut outputs = BTreeMap::new();
    for column in 0..5 {
        let mut graph = Graph::default();
        let neurons = neurons(&mut graph, ei(0, 0), &columns);
        if [1, 3, 4].contains(&column) {
            let output = cadc_readout(&mut graph, ei(0, 0), neurons, &columns, CadcMode::Hagen);
            outputs.insert(column, output);
        }
        graphs.push(graph);
    }
    let input = InputData {
        snippets: (0..5).map(|_| runtime_only(ei(0, 0), 1000, 2)).collect(),
        inter_batch_entry_wait: BTreeMap::new(),
    };
    let result = executor
        .run(&graphs, &[default_configs(&graphs[0])], &input, &Hooks::new())
        .unwrap();

    assert_eq!(result.snippets.len(), 5);
    for (column, snippet) in result.snippets.iter().enumerate() {
        match outputs.get(&column) {
            Some(output) => {
                let DataEntry::Int8(samples) = &snippet.data[output] else {
                    panic!("CADC readout produces Int8 data");
                };
                assert_eq!(samples.len(), 2);
                for entry in samples {
                    assert_eq!(entry.len(), 1);
                    assert_eq!(entry[0].data.len(), columns.len());
                    assert_eq!(entry[0].time, FpgaTime(1000));
                }
            }
            None => assert!(snippet.data.is_empty()),
        }
    }
}

#[test]
fn periodic_cadc_samples_during_the_realtime_interval() {
    let (executor, _) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let neurons = neurons(&mut graph, ei(0, 0), &[5, 6]);
    let output = cadc_readout(&mut graph, ei(0, 0), neurons, &[5, 6], CadcMode::Periodic);
    let result = executor
        .run_graph(
            &graph,
            &default_configs(&graph),
            &InputData::from_snippet(runtime_only(ei(0, 0), 4000, 1)),
            &Hooks::new(),
        )
        .unwrap();

    let DataEntry::Int8(samples) = &result.snippets[0].data[&output] else {
        panic!("CADC readout produces Int8 data");
    };
    let samples = &samples[0];
    assert!(!samples.is_empty());
    assert!(samples.windows(2).all(|w| w[0].time < w[1].time));
    assert!(samples.iter().all(|s| s.time < FpgaTime(4000) && s.data.len() == 2));
}

#[test]
fn madc_samples_are_cut_to_the_realtime_interval() {
    let (executor, _) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let neurons = neurons(&mut graph, ei(0, 0), &[7]);
    let view = MadcReadoutView::new(
        MadcSource {
            neuron: AtomicNeuron::new(Hemisphere::Top, NeuronColumn::new(7)),
            source: ReadoutSource::Membrane,
        },
        None,
        SourceSelection::default(),
    )
    .unwrap();
    let view = graph.add(view, ei(0, 0), [Input::from(neurons)]).unwrap();
    let output = graph
        .add(
            DataOutput::new(ConnectionType::TimedMADCSampleFromChipSequence, 1).unwrap(),
            ei(0, 0),
            [Input::from(view)],
        )
        .unwrap();
    let mut configs = default_configs(&graph);
    for chip in configs.values_mut() {
        chip.madc.sample_period = 50;
    }

    let result = executor
        .run_graph(
            &graph,
            &configs,
            &InputData::from_snippet(runtime_only(ei(0, 0), 1000, 2)),
            &Hooks::new(),
        )
        .unwrap();

    let DataEntry::MadcSamples(samples) = &result.snippets[0].data[&output] else {
        panic!("MADC readout produces sample sequences");
    };
    assert_eq!(samples.len(), 2);
    for entry in samples {
        assert!(!entry.is_empty());
        assert!(entry.iter().all(|s| s.time < FpgaTime(1000)));
        assert!(entry.windows(2).all(|w| w[0].time < w[1].time));
        assert!(entry.iter().all(|s| s.value < 1 << 10));
    }
}

// ============================================================================
// Plasticity recordings
// ============================================================================

fn recording_rule(num_periods: u32, recording: Recording) -> PlasticityRule {
    PlasticityRule::new(
        "kernel",
        Timer {
            start: 0,
            period: 200,
            num_periods,
        },
        vec![],
        vec![],
        Some(recording),
    )
    .unwrap()
}

/// Adds `rule` with a data output covering its whole recording.
fn recorded(graph: &mut Graph, rule: &PlasticityRule) -> VertexId {
    let id = graph.add(rule.clone(), ei(0, 0), []).unwrap();
    let size = graph.vertex_property(id).unwrap().output().size;
    graph
        .add(DataOutput::new(ConnectionType::Int8, size).unwrap(), ei(0, 0), [Input::from(id)])
        .unwrap()
}

fn int8_samples(entry: &DataEntry) -> &Vec<Vec<TimedData<Vec<i8>>>> {
    let DataEntry::Int8(samples) = entry else {
        panic!("recordings are exposed as Int8 data");
    };
    samples
}

#[test]
fn timed_recordings_keep_one_record_per_period_and_column() {
    let observables = BTreeMap::from([(
        "weights".to_owned(),
        Observable::Array {
            element_type: ElementType::Int8,
            size: 4,
        },
    )]);
    let rule = recording_rule(4, Recording::Timed { observables });

    let mut usage = PpuUsage::new(2);
    usage.add_vertex(0, &Vertex::from(rule.clone())).unwrap();
    usage.add_vertex(1, &Vertex::from(rule.clone())).unwrap();
    let program = PpuProgram::compile(&usage, &HardwareParameters::default()).unwrap();
    let layout = &program.recordings()[&rule.id()];
    assert_eq!(layout.first_period, vec![0, 4]);
    let (_, first_end) = layout.column_range(0);
    let (second_begin, second_end) = layout.column_range(1);
    assert!(first_end <= second_begin);
    assert!(second_end <= layout.buffer_bytes());
    assert!(layout.buffers[0] + layout.buffer_bytes() <= layout.buffers[1]);

    let (executor, _) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let output = recorded(&mut graph, &rule);
    let graphs = [graph.clone(), graph];
    let input = InputData {
        snippets: (0..2).map(|_| runtime_only(ei(0, 0), 1000, 2)).collect(),
        inter_batch_entry_wait: BTreeMap::new(),
    };
    let result = executor
        .run(&graphs, &[default_configs(&graphs[0])], &input, &Hooks::new())
        .unwrap();

    assert_eq!(result.snippets.len(), 2);
    for snippet in &result.snippets {
        let samples = int8_samples(&snippet.data[&output]);
        assert_eq!(samples.len(), 2);
        for entry in samples {
            assert_eq!(entry.len(), 4);
            assert!(entry.iter().all(|s| s.time < FpgaTime(1000)));
            assert!(entry.windows(2).all(|w| w[0].time < w[1].time));
        }

        let RecordingData::Timed(decoded) = rule.extract_recording_data(samples).unwrap() else {
            panic!("timed rule decodes into observables");
        };
        let ObservableData::Int8(weights) = &decoded.data_array["weights"] else {
            panic!("weights are recorded as Int8");
        };
        assert!(weights.iter().all(|entry| entry.len() == 4));
    }
}

#[test]
fn raw_recordings_yield_one_block_per_entry() {
    let rule = recording_rule(
        3,
        Recording::Raw {
            scratchpad_memory_size: 8,
        },
    );
    let (executor, _) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let output = recorded(&mut graph, &rule);
    let result = executor
        .run_graph(
            &graph,
            &default_configs(&graph),
            &InputData::from_snippet(runtime_only(ei(0, 0), 1000, 3)),
            &Hooks::new(),
        )
        .unwrap();

    let samples = int8_samples(&result.snippets[0].data[&output]);
    assert_eq!(samples.len(), 3);
    for entry in samples {
        assert_eq!(entry.len(), 1);
        assert_eq!(entry[0].data.len(), 2 * 8);
        assert_eq!(entry[0].time, FpgaTime(1000));
    }
    let RecordingData::Raw(blocks) = rule.extract_recording_data(samples).unwrap() else {
        panic!("raw rule decodes into blocks");
    };
    assert_eq!(blocks.len(), 3);
}

// ============================================================================
// Concurrency and failures
// ============================================================================

/// One spike loop per connection, no dependencies between them.
fn independent_loops() -> (Graph, InputData) {
    let mut graph = Graph::default();
    let mut snippet = DataSnippet::default();
    for connection in 0..2 {
        let (ext, _) = spike_loop(&mut graph, ei(0, connection));
        snippet
            .data
            .insert(ext, DataEntry::SpikesToChip(vec![spikes(&[10, 20])]));
    }
    snippet.runtime = vec![BTreeMap::from([
        (ei(0, 0), FpgaTime(500)),
        (ei(0, 1), FpgaTime(500)),
    ])];
    (graph, InputData::from_snippet(snippet))
}

fn busy_window(handle: &SimulationHandle) -> (Instant, Instant) {
    let runs = handle.runs();
    let start = runs.iter().map(|r| r.start).min().unwrap();
    let end = runs.iter().map(|r| r.end).max().unwrap();
    (start, end)
}

#[test]
fn independent_connections_run_concurrently() {
    let (executor, handles) = executor(2, Duration::from_millis(50));
    let executor = executor.with_workers(2);
    let (graph, input) = independent_loops();
    executor
        .run_graph(&graph, &default_configs(&graph), &input, &Hooks::new())
        .unwrap();

    let (a_start, a_end) = busy_window(&handles[0]);
    let (b_start, b_end) = busy_window(&handles[1]);
    assert!(a_start < b_end && b_start < a_end, "connections never overlapped");
}

#[test]
fn a_single_worker_serialises_connections() {
    let (executor, handles) = executor(2, Duration::from_millis(20));
    let executor = executor.with_workers(1);
    let (graph, input) = independent_loops();
    executor
        .run_graph(&graph, &default_configs(&graph), &input, &Hooks::new())
        .unwrap();

    let (a_start, a_end) = busy_window(&handles[0]);
    let (b_start, b_end) = busy_window(&handles[1]);
    assert!(a_end <= b_start || b_end <= a_start);
}

#[test]
fn a_failing_connection_skips_only_its_descendants() {
    let (executor, handles) = executor(2, Duration::ZERO);
    let mut graph = Graph::default();
    let (loop_ext, _) = spike_loop(&mut graph, ei(0, 0));
    let (chain_ext, _, _) = host_chain(&mut graph, ei(0, 1), ei(1, 1), 4);

    let mut snippet = DataSnippet::default();
    snippet
        .data
        .insert(loop_ext, DataEntry::SpikesToChip(vec![spikes(&[10])]));
    snippet.data.insert(
        chain_ext,
        DataEntry::Int8(vec![vec![TimedData::new(FpgaTime::ZERO, vec![1, 2, 3, 4])]]),
    );
    snippet.runtime = runtime(ei(0, 0), 500, 1);
    handles[1].fail_next(1);

    let err = executor
        .run_graph(
            &graph,
            &default_configs(&graph),
            &InputData::from_snippet(snippet),
            &Hooks::new(),
        )
        .unwrap_err();
    let ExecutionError::NodesFailed {
        failed,
        skipped,
        source,
    } = err
    else {
        panic!("aggregated failure expected, got {err}");
    };
    assert_eq!(failed, vec![ei(0, 1)]);
    assert_eq!(skipped, vec![ei(1, 1)]);
    assert!(matches!(*source, ExecutionError::Backend(_)));
    assert!(!handles[0].runs().is_empty());
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn failed_execution_instances_are_logged() {
    let (executor, handles) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let (ext, _) = spike_loop(&mut graph, ei(0, 0));
    let mut snippet = DataSnippet::default();
    snippet
        .data
        .insert(ext, DataEntry::SpikesToChip(vec![spikes(&[10])]));
    snippet.runtime = runtime(ei(0, 0), 500, 1);
    handles[0].fail_next(1);

    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, || {
        executor.run_graph(
            &graph,
            &default_configs(&graph),
            &InputData::from_snippet(snippet),
            &Hooks::new(),
        )
    });

    assert!(result.is_err());
    let logs = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("execution instance failed"), "logs: {logs}");
    assert!(logs.contains("ERROR"), "logs: {logs}");
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn invalid_requests_touch_no_hardware() {
    let (executor, handles) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    spike_loop(&mut graph, ei(0, 0));
    let input = InputData::default();

    let err = executor
        .run_graph(&graph, &BTreeMap::new(), &input, &Hooks::new())
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Validation(_)));

    let mut elsewhere = Graph::default();
    spike_loop(&mut elsewhere, ei(0, 7));
    assert!(!executor.is_executable_on(&elsewhere));
    let err = executor
        .run_graph(&elsewhere, &default_configs(&elsewhere), &input, &Hooks::new())
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Validation(_)));

    let graphs = [graph.clone(), graph.clone()];
    let mut hooks = Hooks::new();
    let mut hook = ExecutionInstanceHooks::default();
    hook.read_ppu_symbols.insert("runtime".into());
    hooks.insert(ei(0, 0), hook);
    let err = executor
        .run(&graphs, &[default_configs(&graph)], &input, &hooks)
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Validation(_)));

    let three = [default_configs(&graph), default_configs(&graph), default_configs(&graph)];
    let err = executor.run(&graphs, &three, &input, &Hooks::new()).unwrap_err();
    assert!(matches!(err, ExecutionError::Validation(_)));

    assert!(handles[0].runs().is_empty());
}

#[test]
fn empty_requests_produce_empty_output() {
    let (executor, handles) = executor(1, Duration::ZERO);
    let output = executor
        .run(&[], &[], &InputData::default(), &Hooks::new())
        .unwrap();
    assert!(output.is_empty());
    assert!(handles[0].runs().is_empty());
}

// ============================================================================
// PPU symbols and connection bookkeeping
// ============================================================================

fn timed_rule(num_periods: u32) -> PlasticityRule {
    PlasticityRule::new(
        "kernel",
        Timer {
            start: 0,
            period: 200,
            num_periods,
        },
        vec![],
        vec![],
        None,
    )
    .unwrap()
}

#[test]
fn hooks_read_ppu_symbols_after_every_entry() {
    let (executor, _) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    graph.add(timed_rule(20), ei(0, 0), []).unwrap();

    let mut hook = ExecutionInstanceHooks::default();
    hook.read_ppu_symbols = BTreeSet::from(["scheduler_event_drop_count".to_owned()]);
    let hooks = Hooks::from([(ei(0, 0), hook)]);
    let result = executor
        .run_graph(
            &graph,
            &default_configs(&graph),
            &InputData::from_snippet(runtime_only(ei(0, 0), 500, 2)),
            &hooks,
        )
        .unwrap();

    assert_eq!(result.read_ppu_symbols.len(), 2);
    for readout in &result.read_ppu_symbols {
        let PpuSymbolValue::Internal([top, bottom]) =
            &readout[&ei(0, 0)]["scheduler_event_drop_count"]
        else {
            panic!("drop counter lives in internal memory");
        };
        assert_eq!(top.len(), 1);
        assert_eq!(bottom.len(), 1);
        assert!(top[0] > 0 && top[0] < 20 * 2);
    }
}

#[test]
fn symbol_hooks_need_a_known_symbol_and_a_ppu_program() {
    let (executor, _) = executor(1, Duration::ZERO);
    let mut hook = ExecutionInstanceHooks::default();
    hook.read_ppu_symbols.insert("no_such_symbol".into());
    let hooks = Hooks::from([(ei(0, 0), hook)]);

    let mut with_rule = Graph::default();
    with_rule.add(timed_rule(1), ei(0, 0), []).unwrap();
    let err = executor
        .run_graph(
            &with_rule,
            &default_configs(&with_rule),
            &InputData::from_snippet(runtime_only(ei(0, 0), 500, 1)),
            &hooks,
        )
        .unwrap_err();
    let ExecutionError::NodesFailed { source, .. } = err else {
        panic!("aggregated failure expected");
    };
    assert!(matches!(*source, ExecutionError::UnknownSymbol(name) if name == "no_such_symbol"));

    let mut without_ppu = Graph::default();
    let (ext, _) = spike_loop(&mut without_ppu, ei(0, 0));
    let mut snippet = runtime_only(ei(0, 0), 500, 1);
    snippet.data.insert(ext, DataEntry::SpikesToChip(vec![vec![]]));
    let err = executor
        .run_graph(
            &without_ppu,
            &default_configs(&without_ppu),
            &InputData::from_snippet(snippet),
            &hooks,
        )
        .unwrap_err();
    let ExecutionError::NodesFailed { source, .. } = err else {
        panic!("aggregated failure expected");
    };
    assert!(matches!(*source, ExecutionError::NoPpuProgram(e) if e == ei(0, 0)));
}

#[test]
fn connections_are_released_once() {
    let (mut executor, _) = executor(2, Duration::ZERO);
    assert_eq!(executor.contained_connections().len(), 2);
    assert_eq!(executor.unique_identifier(), "sim-0,sim-1");
    assert_eq!(executor.bitfile_info().len(), 2);

    let released = executor.release_connections().unwrap();
    assert_eq!(released.len(), 2);
    assert!(executor.contained_connections().is_empty());
    assert!(executor.release_connections().unwrap().is_empty());

    let mut graph = Graph::default();
    spike_loop(&mut graph, ei(0, 0));
    assert!(!executor.is_executable_on(&graph));
}

#[test]
fn differential_configuration_keeps_chip_state_between_runs() {
    let (executor, handles) = executor(1, Duration::ZERO);
    let mut graph = Graph::default();
    let (ext, _) = spike_loop(&mut graph, ei(0, 0));
    let mut snippet = runtime_only(ei(0, 0), 500, 1);
    snippet
        .data
        .insert(ext, DataEntry::SpikesToChip(vec![spikes(&[10])]));
    let input = InputData::from_snippet(snippet);
    let configs = default_configs(&graph);

    executor.run_graph(&graph, &configs, &input, &Hooks::new()).unwrap();
    let first: usize = handles[0].runs().iter().map(|r| r.instructions).sum();
    handles[0].clear_runs();
    let second = executor.run_graph(&graph, &configs, &input, &Hooks::new()).unwrap();
    let repeated: usize = handles[0].runs().iter().map(|r| r.instructions).sum();

    assert!(repeated < first);
    let chip = &second.pre_execution_chips[&ei(0, 0)];
    let node = CrossbarNodeOnDls::new(
        CrossbarInput::from_l2(L2Channel::new(0)),
        CrossbarOutput::from_l2(L2Channel::new(0)),
    );
    assert_eq!(*chip.crossbar_node(node), CrossbarNodeConfig::PASS_ALL);
    assert_ne!(*chip, Chip::default());
}
