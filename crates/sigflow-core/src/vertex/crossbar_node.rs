//! Crossbar node.

use serde::{Deserialize, Serialize};
use sigflow_hw::chip::CrossbarNodeConfig;
use sigflow_hw::coord::CrossbarNodeOnDls;

use super::{Vertex, VertexProperties};
use crate::connection_type::ConnectionType;
use crate::port::{Port, PortRestriction};

/// Crossbar node forwarding labels matching its mask/target from one
/// crossbar input to one output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossbarNode {
    coordinate: CrossbarNodeOnDls,
    config: CrossbarNodeConfig,
}

impl CrossbarNode {
    /// Creates the vertex.
    pub fn new(coordinate: CrossbarNodeOnDls, config: CrossbarNodeConfig) -> Self {
        Self { coordinate, config }
    }

    /// Node location.
    pub fn coordinate(&self) -> CrossbarNodeOnDls {
        self.coordinate
    }

    /// Node configuration.
    pub fn config(&self) -> &CrossbarNodeConfig {
        &self.config
    }
}

impl VertexProperties for CrossbarNode {
    const NAME: &'static str = "CrossbarNode";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::CrossbarInputLabel)]
    }

    fn output(&self) -> Port {
        Port::new(1, ConnectionType::CrossbarOutputLabel)
    }

    fn supports_input_from(&self, source: &Vertex, restriction: Option<&PortRestriction>) -> bool {
        let input = self.coordinate.input;
        match source {
            Vertex::NeuronEventOutputView(view) => {
                let outputs = view.event_outputs();
                let selected = super::restricted(&outputs, restriction);
                input
                    .event_output()
                    .is_some_and(|out| selected.contains(&out))
            }
            Vertex::BackgroundSpikeSource(source) => source.coordinate().crossbar_input() == input,
            Vertex::CrossbarL2Input(_) => input.l2_channel().is_some(),
            _ => true,
        }
    }
}
