//! Criterion benchmarks for graph construction (`sigflow-core::graph`).
//!
//! Two axes:
//!
//! - **Build**: validated `add` calls, including the acyclicity probe on the
//!   execution instance graph
//! - **Query**: local topological order and JSON round trip of a built graph
//!
//! Run with: `cargo bench -p sigflow-core -- graph/`
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use sigflow_core::vertex::transformation::TransformationFunction;
use sigflow_core::vertex::{DataInput, DataOutput, ExternalInput, Transformation};
use sigflow_core::{ConnectionType, ExecutionInstanceId, Graph, Input};

const VECTOR_SIZE: usize = 256;
const CHAIN_LENGTHS: &[u32] = &[4, 16, 64];

// ---------------------------------------------------------------------------
// Graph constructors
// ---------------------------------------------------------------------------

/// Chain of `steps` execution instances, each `DataInput → DataOutput`,
/// linked through host-only single-input additions.
fn make_chain(steps: u32, check: bool) -> Graph {
    let mut graph = Graph::new(check);
    let first = ExecutionInstanceId::step(0);
    let ext = graph
        .add(ExternalInput::new(ConnectionType::DataInt8, VECTOR_SIZE).unwrap(), first, [])
        .unwrap();
    let mut prev = graph
        .add(DataInput::new(ConnectionType::Int8, VECTOR_SIZE).unwrap(), first, [Input::from(ext)])
        .unwrap();

    for step in 0..steps {
        let ei = ExecutionInstanceId::step(2 * step);
        let out = graph
            .add(DataOutput::new(ConnectionType::Int8, VECTOR_SIZE).unwrap(), ei, [Input::from(prev)])
            .unwrap();
        let sum = Transformation::new(TransformationFunction::Addition {
            num_inputs: 1,
            size: VECTOR_SIZE,
        })
        .unwrap();
        let sum = graph
            .add(sum, ExecutionInstanceId::step(2 * step + 1), [Input::from(out)])
            .unwrap();
        prev = graph
            .add(
                DataInput::new(ConnectionType::Int8, VECTOR_SIZE).unwrap(),
                ExecutionInstanceId::step(2 * step + 2),
                [Input::from(sum)],
            )
            .unwrap();
    }
    graph
}

// ---------------------------------------------------------------------------
// Build benchmarks
// ---------------------------------------------------------------------------

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/build");

    for &steps in CHAIN_LENGTHS {
        group.bench_with_input(BenchmarkId::new("checked", steps), &steps, |b, &steps| {
            b.iter(|| black_box(make_chain(steps, true)));
        });
        group.bench_with_input(BenchmarkId::new("unchecked", steps), &steps, |b, &steps| {
            b.iter(|| black_box(make_chain(steps, false)));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Query benchmarks
// ---------------------------------------------------------------------------

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/query");

    let graph = make_chain(64, true);
    group.bench_function("instance_order_64", |b| {
        b.iter(|| black_box(graph.execution_instance_graph().topological_order()));
    });
    group.bench_function("local_order_64", |b| {
        b.iter(|| black_box(graph.local_topological_order(ExecutionInstanceId::step(0))));
    });
    group.bench_function("json_roundtrip_64", |b| {
        b.iter(|| {
            let json = graph.to_json().unwrap();
            black_box(Graph::from_json(black_box(&json)).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_build, bench_query);
criterion_main!(benches);
