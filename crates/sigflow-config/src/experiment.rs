//! Experiment description files.
//!
//! An experiment lists execution instances and what each of them does:
//! inject spikes, loop them back through the crossbar, read membranes via
//! the CADC or MADC, or post-process the CADC readout of an earlier
//! instance. [`Experiment::build`] turns the description into the graph,
//! input data and chip configurations an executor runs.
//!
//! ```toml
//! batch_size = 2
//! inter_batch_entry_wait_us = 10
//!
//! [[instances]]
//! connection = 0
//! runtime_us = 100
//! loopback = true
//! spikes = [{ time_us = 10.0, label = 3 }, { time_us = 20.5, label = 4, batch = 1 }]
//! cadc = { columns = [0, 1, 2, 3], mode = "hagen" }
//!
//! [[instances]]
//! connection = 1
//! runtime_us = 50
//! madc = { column = 5 }
//! after = 0
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sigflow_core::vertex::{
    CadcMembraneReadoutView, CadcMode, CrossbarL2Input, CrossbarL2Output, CrossbarNode, DataInput,
    DataOutput, ExternalInput, MadcReadoutView, MadcSource, NeuronView, NeuronViewConfig,
    SourceSelection, Transformation, TransformationFunction,
};
use sigflow_core::{
    ConnectionType, DataEntry, DataSnippet, ExecutionInstanceId, Graph, Input, InputData,
    PortRestriction, VertexId,
};
use sigflow_hw::chip::{CrossbarNodeConfig, ReadoutSource};
use sigflow_hw::coord::{
    AtomicNeuron, CrossbarInput, CrossbarNodeOnDls, CrossbarOutput, L2Channel, NeuronColumn,
};
use sigflow_hw::time::FPGA_CLOCK_CYCLES_PER_US;
use sigflow_hw::{
    Chip, ChipOnConnection, ChipOnExecutor, ConnectionOnExecutor, FpgaTime, Hemisphere,
    SpikeLabel, TimedSpikeToChip,
};

use crate::error::{ConfigError, Result};

/// Largest neuron label a spike can carry.
const MAX_NEURON_LABEL: u16 = 0x3fff;

/// Experiment file contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Experiment {
    /// Batch entries run per execution.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Wait between the begin of consecutive batch entries.
    #[serde(default)]
    pub inter_batch_entry_wait_us: u64,
    /// Execution instances in dependency order.
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

fn default_batch_size() -> usize {
    1
}

/// One execution instance of an experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InstanceSpec {
    /// Connection the instance runs on.
    #[serde(default)]
    pub connection: u32,
    /// Chip on that connection.
    #[serde(default)]
    pub chip: u32,
    /// Realtime duration of every batch entry.
    pub runtime_us: u64,
    /// Route L2 channel 0 back to the host.
    #[serde(default)]
    pub loopback: bool,
    /// Spikes injected on L2 channel 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spikes: Vec<SpikeSpec>,
    /// CADC readout of top-hemisphere neurons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadc: Option<CadcSpec>,
    /// MADC recording of one top-hemisphere neuron.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub madc: Option<MadcSpec>,
    /// Earlier instance whose CADC readout is rectified on this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<usize>,
}

/// Spike injected at `time_us` into one or all batch entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SpikeSpec {
    /// Time relative to the realtime interval begin.
    pub time_us: f64,
    /// 14-bit neuron label.
    pub label: u16,
    /// Batch entry; every entry when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
}

/// CADC readout settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CadcSpec {
    /// Neuron columns read.
    pub columns: Vec<usize>,
    /// Sampling mode.
    #[serde(default)]
    pub mode: ReadoutMode,
    /// Right shift of the rectification applied by dependent instances.
    #[serde(default = "default_shift")]
    pub shift: u32,
}

fn default_shift() -> u32 {
    2
}

/// CADC sampling mode as written in experiment files.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutMode {
    /// One sample after the realtime interval.
    #[default]
    Hagen,
    /// Continuous sampling into external PPU memory.
    Periodic,
    /// Continuous sampling into external DRAM.
    PeriodicOnDram,
}

impl From<ReadoutMode> for CadcMode {
    fn from(mode: ReadoutMode) -> Self {
        match mode {
            ReadoutMode::Hagen => CadcMode::Hagen,
            ReadoutMode::Periodic => CadcMode::Periodic,
            ReadoutMode::PeriodicOnDram => CadcMode::PeriodicOnDram,
        }
    }
}

/// MADC recording settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MadcSpec {
    /// Neuron column recorded.
    pub column: usize,
    /// FPGA cycles between samples.
    #[serde(default = "default_sample_period")]
    pub sample_period: u16,
}

fn default_sample_period() -> u16 {
    125
}

/// Vertices of one instance whose data an execution returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceVertices {
    /// Execution instance.
    pub execution_instance: ExecutionInstanceId,
    /// Spikes received through the loopback.
    pub spikes: Option<VertexId>,
    /// CADC samples.
    pub cadc: Option<VertexId>,
    /// MADC samples.
    pub madc: Option<VertexId>,
    /// Rectified CADC readout of the instance named by `after`.
    pub rectified: Option<VertexId>,
}

/// Everything an executor needs to run an experiment.
#[derive(Debug)]
pub struct ExperimentGraph {
    /// Graph of all instances.
    pub graph: Graph,
    /// Runtimes and injected spikes.
    pub input: InputData,
    /// Chip configuration per execution instance.
    pub configs: BTreeMap<ExecutionInstanceId, Chip>,
    /// Result vertices per instance, in file order.
    pub instances: Vec<InstanceVertices>,
}

impl Experiment {
    /// Load an experiment from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Parse an experiment from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let experiment: Experiment = toml::from_str(toml_str)?;
        experiment.validate()?;
        Ok(experiment)
    }

    /// Save the experiment to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Execution instance of instance `index`.
    pub fn execution_instance(&self, index: usize) -> Option<ExecutionInstanceId> {
        let spec = self.instances.get(index)?;
        let step = u32::try_from(index).ok()?;
        Some(ExecutionInstanceId::new(
            step,
            ChipOnExecutor::new(
                ConnectionOnExecutor(spec.connection),
                ChipOnConnection(spec.chip),
            ),
        ))
    }

    /// Check references, ranges and labels.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::validation("batch_size must be at least 1"));
        }
        if self.instances.is_empty() {
            return Err(ConfigError::validation("experiment has no instances"));
        }
        for (index, spec) in self.instances.iter().enumerate() {
            let fail = |what: String| Err(ConfigError::validation(format!("instance {index}: {what}")));
            if spec.spikes.is_empty()
                && !spec.loopback
                && spec.cadc.is_none()
                && spec.madc.is_none()
                && spec.after.is_none()
            {
                return fail("does nothing".into());
            }
            for spike in &spec.spikes {
                if !spike.time_us.is_finite() || spike.time_us < 0.0 {
                    return fail(format!("spike time {} is not a non-negative number", spike.time_us));
                }
                if spike.label > MAX_NEURON_LABEL {
                    return fail(format!("spike label {} exceeds 14 bits", spike.label));
                }
                if spike.batch.is_some_and(|b| b >= self.batch_size) {
                    return fail(format!("spike for batch entry {:?} beyond batch size", spike.batch));
                }
            }
            if let Some(cadc) = &spec.cadc {
                if cadc.columns.is_empty() {
                    return fail("CADC readout without columns".into());
                }
                if let Some(c) = cadc.columns.iter().find(|&&c| c >= NeuronColumn::SIZE) {
                    return fail(format!("neuron column {c} out of range"));
                }
            }
            if let Some(madc) = &spec.madc
                && madc.column >= NeuronColumn::SIZE
            {
                return fail(format!("neuron column {} out of range", madc.column));
            }
            if let Some(after) = spec.after {
                if after >= index {
                    return fail(format!("depends on instance {after}, which does not precede it"));
                }
                if self.instances[after].cadc.is_none() {
                    return fail(format!("depends on instance {after}, which reads no CADC data"));
                }
            }
        }
        Ok(())
    }

    /// Builds graph, input and chip configurations.
    pub fn build(&self) -> Result<ExperimentGraph> {
        self.validate()?;
        let mut graph = Graph::default();
        let mut snippet = DataSnippet {
            data: BTreeMap::new(),
            runtime: vec![BTreeMap::new(); self.batch_size],
        };
        let mut input = InputData::default();
        let mut configs = BTreeMap::new();
        let mut instances: Vec<InstanceVertices> = Vec::new();

        for (index, spec) in self.instances.iter().enumerate() {
            let ei = self
                .execution_instance(index)
                .ok_or_else(|| ConfigError::validation(format!("instance {index} out of range")))?;
            let mut vertices = InstanceVertices {
                execution_instance: ei,
                spikes: None,
                cadc: None,
                madc: None,
                rectified: None,
            };

            if !spec.spikes.is_empty() || spec.loopback {
                let ext = graph.add(
                    ExternalInput::new(ConnectionType::DataTimedSpikeToChipSequence, 1)?,
                    ei,
                    [],
                )?;
                let data_input = graph.add(
                    DataInput::new(ConnectionType::TimedSpikeToChipSequence, 1)?,
                    ei,
                    [Input::from(ext)],
                )?;
                let l2_input = graph.add(CrossbarL2Input, ei, [Input::from(data_input)])?;
                snippet
                    .data
                    .insert(ext, DataEntry::SpikesToChip(self.spikes_per_entry(spec)));
                if spec.loopback {
                    vertices.spikes = Some(loopback(&mut graph, ei, l2_input)?);
                }
            }

            let mut columns: Vec<usize> = spec.cadc.iter().flat_map(|c| c.columns.clone()).collect();
            let cadc_len = columns.len();
            let madc_index = spec.madc.map(|madc| {
                columns.iter().position(|&c| c == madc.column).unwrap_or_else(|| {
                    columns.push(madc.column);
                    columns.len() - 1
                })
            });
            if !columns.is_empty() {
                let neurons = graph.add(
                    NeuronView::new(
                        columns.iter().copied().map(NeuronColumn::new).collect(),
                        vec![NeuronViewConfig::default(); columns.len()],
                        Hemisphere::Top,
                    )?,
                    ei,
                    [],
                )?;
                if let Some(cadc) = &spec.cadc {
                    let view = CadcMembraneReadoutView::new(
                        vec![cadc.columns.iter().copied().map(NeuronColumn::new).collect()],
                        Hemisphere::Top,
                        cadc.mode.into(),
                        vec![vec![ReadoutSource::Membrane; cadc_len]],
                    )?;
                    let source = if columns.len() == cadc_len {
                        Input::from(neurons)
                    } else {
                        Input::restricted(neurons, PortRestriction::new(0, cadc_len - 1))
                    };
                    let view = graph.add(view, ei, [source])?;
                    vertices.cadc = Some(graph.add(
                        DataOutput::new(ConnectionType::Int8, cadc_len)?,
                        ei,
                        [Input::from(view)],
                    )?);
                }
                if let (Some(madc), Some(position)) = (spec.madc, madc_index) {
                    let view = MadcReadoutView::new(
                        MadcSource {
                            neuron: AtomicNeuron::new(Hemisphere::Top, NeuronColumn::new(madc.column)),
                            source: ReadoutSource::Membrane,
                        },
                        None,
                        SourceSelection::default(),
                    )?;
                    let source = Input::restricted(neurons, PortRestriction::new(position, position));
                    let view = graph.add(view, ei, [source])?;
                    vertices.madc = Some(graph.add(
                        DataOutput::new(ConnectionType::TimedMADCSampleFromChipSequence, 1)?,
                        ei,
                        [Input::from(view)],
                    )?);
                }
            }

            if let Some(after) = spec.after {
                let (Some(upstream), Some(cadc)) = (instances[after].cadc, &self.instances[after].cadc)
                else {
                    return Err(ConfigError::validation(format!(
                        "instance {index}: upstream instance {after} has no CADC output"
                    )));
                };
                let relu = Transformation::new(TransformationFunction::ConvertingRelu {
                    size: cadc.columns.len(),
                    shift: cadc.shift,
                })?;
                vertices.rectified = Some(graph.add(relu, ei, [Input::from(upstream)])?);
            }

            let runtime = FpgaTime::from_us(spec.runtime_us);
            for entry in &mut snippet.runtime {
                entry.insert(ei, runtime);
            }
            if self.inter_batch_entry_wait_us > 0 {
                input
                    .inter_batch_entry_wait
                    .insert(ei, FpgaTime::from_us(self.inter_batch_entry_wait_us));
            }
            let mut chip = Chip::default();
            if let Some(madc) = spec.madc {
                chip.madc.sample_period = madc.sample_period.max(1);
            }
            configs.insert(ei, chip);
            debug!(%ei, index, "experiment instance built");
            instances.push(vertices);
        }

        input.snippets.push(snippet);
        Ok(ExperimentGraph {
            graph,
            input,
            configs,
            instances,
        })
    }

    fn spikes_per_entry(&self, spec: &InstanceSpec) -> Vec<Vec<TimedSpikeToChip>> {
        (0..self.batch_size)
            .map(|entry| {
                let mut spikes: Vec<_> = spec
                    .spikes
                    .iter()
                    .filter(|s| s.batch.is_none_or(|b| b == entry))
                    .map(|s| TimedSpikeToChip {
                        time: us_to_cycles(s.time_us),
                        label: SpikeLabel::new(L2Channel::new(0), s.label),
                    })
                    .collect();
                spikes.sort();
                spikes
            })
            .collect()
    }
}

/// Pass-all crossbar route from L2 channel 0 back to the host.
fn loopback(graph: &mut Graph, ei: ExecutionInstanceId, l2_input: VertexId) -> Result<VertexId> {
    let node = CrossbarNode::new(
        CrossbarNodeOnDls::new(
            CrossbarInput::from_l2(L2Channel::new(0)),
            CrossbarOutput::from_l2(L2Channel::new(0)),
        ),
        CrossbarNodeConfig::PASS_ALL,
    );
    let node = graph.add(node, ei, [Input::from(l2_input)])?;
    let l2_output = graph.add(CrossbarL2Output, ei, [Input::from(node)])?;
    Ok(graph.add(
        DataOutput::new(ConnectionType::TimedSpikeFromChipSequence, 1)?,
        ei,
        [Input::from(l2_output)],
    )?)
}

fn us_to_cycles(us: f64) -> FpgaTime {
    FpgaTime((us * FPGA_CLOCK_CYCLES_PER_US as f64).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_INSTANCES: &str = r#"
        batch_size = 2
        inter_batch_entry_wait_us = 10

        [[instances]]
        runtime_us = 100
        loopback = true
        spikes = [{ time_us = 20.0, label = 3 }, { time_us = 10.0, label = 4, batch = 1 }]
        cadc = { columns = [0, 1, 2, 3], mode = "hagen" }

        [[instances]]
        connection = 1
        runtime_us = 50
        madc = { column = 5 }
        after = 0
    "#;

    #[test]
    fn instances_become_vertices_on_their_chips() {
        let experiment = Experiment::from_toml(TWO_INSTANCES).unwrap();
        let built = experiment.build().unwrap();
        let [first, second] = built.instances[..] else {
            panic!("two instances expected");
        };
        assert_eq!(first.execution_instance.chip.connection, ConnectionOnExecutor(0));
        assert_eq!(second.execution_instance.chip.connection, ConnectionOnExecutor(1));
        assert!(first.spikes.is_some() && first.cadc.is_some() && first.madc.is_none());
        assert!(second.madc.is_some() && second.rectified.is_some());
        assert_eq!(built.graph.execution_instances().len(), 2);
        assert_eq!(built.configs[&second.execution_instance].madc.sample_period, 125);
        assert_eq!(
            built.input.inter_batch_entry_wait[&first.execution_instance],
            FpgaTime::from_us(10)
        );
    }

    #[test]
    fn spikes_are_sorted_per_batch_entry() {
        let built = Experiment::from_toml(TWO_INSTANCES).unwrap().build().unwrap();
        let snippet = &built.input.snippets[0];
        assert_eq!(snippet.runtime.len(), 2);
        let DataEntry::SpikesToChip(spikes) = snippet.data.values().next().unwrap() else {
            panic!("spike input expected");
        };
        assert_eq!(spikes[0].len(), 1);
        assert_eq!(spikes[1].len(), 2);
        assert_eq!(spikes[1][0].time, FpgaTime(1250));
        assert_eq!(spikes[1][0].label, SpikeLabel(4));
        assert_eq!(spikes[1][1].time, FpgaTime::from_us(20));
    }

    #[test]
    fn madc_shares_the_cadc_neuron_view() {
        let experiment = Experiment {
            batch_size: 1,
            inter_batch_entry_wait_us: 0,
            instances: vec![InstanceSpec {
                runtime_us: 10,
                cadc: Some(CadcSpec {
                    columns: vec![4, 5],
                    mode: ReadoutMode::Periodic,
                    shift: 2,
                }),
                madc: Some(MadcSpec {
                    column: 9,
                    sample_period: 10,
                }),
                ..InstanceSpec::default()
            }],
        };
        let built = experiment.build().unwrap();
        let ei = built.instances[0].execution_instance;
        let views = built
            .graph
            .vertices_of(ei)
            .iter()
            .filter(|&&v| matches!(built.graph.vertex_property(v), Ok(sigflow_core::Vertex::NeuronView(_))))
            .count();
        assert_eq!(views, 1);
    }

    #[test]
    fn invalid_experiments_are_rejected() {
        for toml in [
            "batch_size = 0\n[[instances]]\nruntime_us = 1\nloopback = true\n",
            "instances = []\n",
            "[[instances]]\nruntime_us = 1\n",
            "[[instances]]\nruntime_us = 1\nspikes = [{ time_us = 1.0, label = 20000 }]\n",
            "[[instances]]\nruntime_us = 1\nspikes = [{ time_us = 1.0, label = 1, batch = 3 }]\n",
            "[[instances]]\nruntime_us = 1\ncadc = { columns = [] }\n",
            "[[instances]]\nruntime_us = 1\nmadc = { column = 4096 }\n",
            "[[instances]]\nruntime_us = 1\nafter = 0\n",
            "[[instances]]\nruntime_us = 1\nloopback = true\n[[instances]]\nruntime_us = 1\nafter = 0\n",
        ] {
            let err = Experiment::from_toml(toml).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "accepted: {toml}");
        }
        let err = Experiment::from_toml("[[instances]]\nruntime_us = 1\nloop = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn duplicate_cadc_columns_surface_as_graph_errors() {
        let experiment = Experiment::from_toml(
            "[[instances]]\nruntime_us = 1\ncadc = { columns = [2, 2] }\n",
        )
        .unwrap();
        assert!(matches!(experiment.build(), Err(ConfigError::Graph(_))));
    }
}
