//! Neuron event output view.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sigflow_hw::coord::{AtomicNeuron, Hemisphere, NeuronColumn, NeuronEventOutput};

use super::{Vertex, VertexProperties, restricted};
use crate::connection_type::ConnectionType;
use crate::port::{Port, PortRestriction};

/// Routes spikes of neuron collections onto their event outputs towards
/// the crossbar.
///
/// One input port per collection, ordered by hemisphere then collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronEventOutputView {
    neurons: BTreeMap<Hemisphere, Vec<Vec<NeuronColumn>>>,
}

impl NeuronEventOutputView {
    /// Creates the vertex.
    pub fn new(neurons: BTreeMap<Hemisphere, Vec<Vec<NeuronColumn>>>) -> Self {
        Self { neurons }
    }

    /// Neuron collections per hemisphere.
    pub fn neurons(&self) -> &BTreeMap<Hemisphere, Vec<Vec<NeuronColumn>>> {
        &self.neurons
    }

    /// Distinct event outputs used by the neurons, ascending.
    pub fn event_outputs(&self) -> Vec<NeuronEventOutput> {
        self.neurons
            .iter()
            .flat_map(|(&row, collections)| {
                collections
                    .iter()
                    .flatten()
                    .map(move |&column| AtomicNeuron::new(row, column).event_output())
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl VertexProperties for NeuronEventOutputView {
    const NAME: &'static str = "NeuronEventOutputView";

    fn inputs(&self) -> Vec<Port> {
        self.neurons
            .values()
            .flatten()
            .map(|c| Port::new(c.len(), ConnectionType::MembraneVoltage))
            .collect()
    }

    fn output(&self) -> Port {
        Port::new(self.event_outputs().len(), ConnectionType::CrossbarInputLabel)
    }

    fn supports_input_from(&self, source: &Vertex, restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::NeuronView(view) => {
                let columns = restricted(view.columns(), restriction);
                self.neurons
                    .get(&view.row())
                    .is_some_and(|collections| collections.iter().any(|c| c == columns))
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_outputs_are_deduplicated() {
        let view = NeuronEventOutputView::new(BTreeMap::from([(
            Hemisphere::Top,
            vec![
                vec![NeuronColumn::new(0), NeuronColumn::new(1)],
                vec![NeuronColumn::new(200)],
            ],
        )]));
        assert_eq!(view.inputs().len(), 2);
        let outputs = view.event_outputs();
        assert_eq!(outputs.len(), 2);
        assert_eq!(view.output().size, 2);
    }
}
