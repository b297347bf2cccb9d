//! Neuron view.

use serde::{Deserialize, Serialize};
use sigflow_hw::coord::{Hemisphere, NeuronColumn};

use super::{Vertex, VertexProperties, all_unique, invalid, restricted};
use crate::connection_type::ConnectionType;
use crate::error::Result;
use crate::port::{Port, PortRestriction};

/// Per-neuron settings of a [`NeuronView`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronViewConfig {
    /// Label of emitted spikes; `None` disables spike output.
    pub label: Option<u16>,
    /// Reset the neuron at the begin of every realtime interval.
    pub enable_reset: bool,
}

/// Set of neurons in one hemisphere receiving synaptic input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronView {
    columns: Vec<NeuronColumn>,
    configs: Vec<NeuronViewConfig>,
    row: Hemisphere,
}

impl NeuronView {
    /// Creates the vertex. Columns must be unique, one config per column.
    pub fn new(
        columns: Vec<NeuronColumn>,
        configs: Vec<NeuronViewConfig>,
        row: Hemisphere,
    ) -> Result<Self> {
        if !all_unique(&columns) {
            return Err(invalid(Self::NAME, "columns are not unique"));
        }
        if configs.len() != columns.len() {
            return Err(invalid(Self::NAME, "number of configs does not match columns"));
        }
        Ok(Self {
            columns,
            configs,
            row,
        })
    }

    /// Neuron columns.
    pub fn columns(&self) -> &[NeuronColumn] {
        &self.columns
    }

    /// Per-neuron configs, aligned with [`columns`](Self::columns).
    pub fn configs(&self) -> &[NeuronViewConfig] {
        &self.configs
    }

    /// Hemisphere.
    pub fn row(&self) -> Hemisphere {
        self.row
    }
}

impl VertexProperties for NeuronView {
    const NAME: &'static str = "NeuronView";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(self.columns.len(), ConnectionType::SynapticInput)]
    }

    fn output(&self) -> Port {
        Port::new(self.columns.len(), ConnectionType::MembraneVoltage)
    }

    fn variadic_input(&self) -> bool {
        true
    }

    fn supports_input_from(&self, source: &Vertex, restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::SynapseArrayView(s) => {
                s.synram() == self.row && restricted(s.columns(), restriction) == self.columns
            }
            Vertex::SynapseArrayViewSparse(s) => {
                s.synram() == self.row && restricted(s.columns(), restriction) == self.columns
            }
            _ => true,
        }
    }
}
