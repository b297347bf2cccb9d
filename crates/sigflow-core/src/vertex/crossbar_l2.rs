//! FPGA-side crossbar endpoints.

use serde::{Deserialize, Serialize};

use super::{Vertex, VertexProperties};
use crate::connection_type::ConnectionType;
use crate::port::{Port, PortRestriction};

/// Spikes injected by the FPGA, entering the crossbar at the L2 inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossbarL2Input;

impl VertexProperties for CrossbarL2Input {
    const NAME: &'static str = "CrossbarL2Input";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::TimedSpikeToChipSequence)]
    }

    fn output(&self) -> Port {
        Port::new(1, ConnectionType::CrossbarInputLabel)
    }
}

/// Spikes leaving the crossbar at the L2 outputs, recorded by the FPGA.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossbarL2Output;

impl VertexProperties for CrossbarL2Output {
    const NAME: &'static str = "CrossbarL2Output";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::CrossbarOutputLabel)]
    }

    fn output(&self) -> Port {
        Port::new(1, ConnectionType::TimedSpikeFromChipSequence)
    }

    fn variadic_input(&self) -> bool {
        true
    }

    fn supports_input_from(&self, source: &Vertex, _restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::CrossbarNode(node) => node.coordinate().output.l2_channel().is_some(),
            _ => true,
        }
    }
}
