//! Static chip configuration derived from the hardware vertices of one
//! execution instance.
//!
//! The visitor starts from the caller's chip configuration and overwrites
//! only what the graph determines: synapse weights and labels, routing
//! (synapse drivers, PADI busses, crossbar nodes, event outputs), spike
//! labels of neurons, background sources and the readout chains.

use sigflow_core::vertex::{MadcReadoutView, SynapseArrayView, SynapseArrayViewSparse};
use sigflow_core::{ExecutionInstanceId, Graph, Vertex};
use sigflow_hw::Chip;
use sigflow_hw::coord::AtomicNeuron;

use crate::error::Result;

/// Applies the vertices of one execution instance to a chip configuration.
#[derive(Clone, Copy, Debug)]
pub struct ConfigVisitor<'a> {
    graph: &'a Graph,
    execution_instance: ExecutionInstanceId,
}

impl<'a> ConfigVisitor<'a> {
    /// Visitor over the vertices of `execution_instance` in `graph`.
    pub fn new(graph: &'a Graph, execution_instance: ExecutionInstanceId) -> Self {
        Self {
            graph,
            execution_instance,
        }
    }

    /// Returns `chip` with every hardware vertex applied.
    pub fn apply(&self, mut chip: Chip) -> Result<Chip> {
        for &id in self.graph.vertices_of(self.execution_instance) {
            apply_vertex(&mut chip, self.graph.vertex_property(id)?);
        }
        Ok(chip)
    }
}

fn apply_vertex(chip: &mut Chip, vertex: &Vertex) {
    match vertex {
        Vertex::SynapseArrayView(view) => apply_synapses(chip, view),
        Vertex::SynapseArrayViewSparse(view) => apply_sparse_synapses(chip, view),
        Vertex::SynapseDriver(driver) => {
            *chip.synapse_driver_mut(driver.coordinate()) = *driver.config();
        }
        Vertex::PadiBus(bus) => chip.padi_bus_mut(bus.coordinate()).enable_spl1 = true,
        Vertex::CrossbarNode(node) => *chip.crossbar_node_mut(node.coordinate()) = *node.config(),
        Vertex::BackgroundSpikeSource(source) => {
            chip.background_spike_sources[source.coordinate().value()] = *source.config();
        }
        Vertex::NeuronEventOutputView(view) => {
            for output in view.event_outputs() {
                chip.event_outputs[output.value()] = true;
            }
        }
        Vertex::NeuronView(view) => {
            for (&column, config) in view.columns().iter().zip(view.configs()) {
                let neuron = chip.neuron_mut(AtomicNeuron::new(view.row(), column));
                neuron.enable_address_out = config.label.is_some();
                if let Some(label) = config.label {
                    neuron.address_out = label;
                }
            }
        }
        Vertex::CadcMembraneReadoutView(view) => {
            chip.cadc[view.synram().value()].enable = true;
            let sources = view.sources().iter().flatten();
            for (column, &source) in view.flat_columns().zip(sources) {
                let neuron = chip.neuron_mut(AtomicNeuron::new(view.synram(), column));
                neuron.enable_readout = true;
                neuron.readout_source = source;
            }
        }
        Vertex::MadcReadoutView(view) => apply_madc(chip, view),
        Vertex::DataInput(_)
        | Vertex::DataOutput(_)
        | Vertex::ExternalInput(_)
        | Vertex::Transformation(_)
        | Vertex::CrossbarL2Input(_)
        | Vertex::CrossbarL2Output(_)
        | Vertex::PlasticityRule(_) => {}
    }
}

fn apply_synapses(chip: &mut Chip, view: &SynapseArrayView) {
    let matrix = &mut chip.synapses[view.synram().value()];
    for (i, row) in view.rows().iter().enumerate() {
        for (j, column) in view.columns().iter().enumerate() {
            matrix.set_weight(row.value(), column.value(), view.weights()[i][j]);
            matrix.set_label(row.value(), column.value(), view.labels()[i][j]);
        }
    }
}

fn apply_sparse_synapses(chip: &mut Chip, view: &SynapseArrayViewSparse) {
    let matrix = &mut chip.synapses[view.synram().value()];
    for synapse in view.synapses() {
        let row = view.rows()[synapse.index_row].value();
        let column = view.columns()[synapse.index_column].value();
        matrix.set_weight(row, column, synapse.weight);
        matrix.set_label(row, column, synapse.label);
    }
}

fn apply_madc(chip: &mut Chip, view: &MadcReadoutView) {
    chip.madc.sources = [
        Some(view.first_source().neuron),
        view.second_source().map(|s| s.neuron),
    ];
    chip.madc.initial_channel = view.source_selection().initial;
    chip.madc.switch_period = view.source_selection().period;
    for source in view.sources() {
        let neuron = chip.neuron_mut(source.neuron);
        neuron.enable_readout = true;
        neuron.readout_source = source.source;
    }
}
