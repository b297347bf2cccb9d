//! Property tests over recorded event times.

mod common;

use std::time::Duration;

use proptest::prelude::*;

use sigflow_core::{DataEntry, DataSnippet, Graph, InputData};
use sigflow_exec::Hooks;
use sigflow_hw::{FpgaTime, SpikeLabel, TimedSpikeToChip};

use common::*;

fn to_chip(times: &[u64]) -> Vec<TimedSpikeToChip> {
    let mut spikes: Vec<_> = times
        .iter()
        .map(|&t| TimedSpikeToChip {
            time: FpgaTime(t),
            label: SpikeLabel(1),
        })
        .collect();
    spikes.sort();
    spikes
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Recorded spikes carry times inside `[0, runtime)` of their own batch
    /// entry, whatever the input times were.
    #[test]
    fn recorded_times_stay_inside_the_runtime(
        batches in prop::collection::vec(prop::collection::vec(0u64..3000, 0..12), 1..4),
        runtime in 100u64..2000,
    ) {
        let (executor, _) = executor(1, Duration::ZERO);
        let mut graph = Graph::default();
        let (ext, output) = spike_loop(&mut graph, ei(0, 0));
        let mut snippet = DataSnippet::default();
        snippet.data.insert(
            ext,
            DataEntry::SpikesToChip(batches.iter().map(|b| to_chip(b)).collect()),
        );
        snippet.runtime = common::runtime(ei(0, 0), runtime, batches.len());

        let result = executor
            .run_graph(&graph, &default_configs(&graph), &InputData::from_snippet(snippet), &Hooks::new())
            .unwrap();
        let DataEntry::SpikesFromChip(received) = &result.snippets[0].data[&output] else {
            panic!("spike output expected");
        };
        prop_assert_eq!(received.len(), batches.len());
        for (sent, got) in batches.iter().zip(received) {
            prop_assert!(got.len() <= sent.len());
            prop_assert!(got.iter().all(|s| s.time.value() < runtime));
            prop_assert!(got.windows(2).all(|w| w[0].time <= w[1].time));
            let early = sent.iter().filter(|&&t| t + 10 < runtime).count();
            prop_assert!(got.len() >= early);
        }
    }
}
