//! PADI bus.

use serde::{Deserialize, Serialize};
use sigflow_hw::coord::PadiBusOnDls;

use super::{Vertex, VertexProperties};
use crate::connection_type::ConnectionType;
use crate::port::{Port, PortRestriction};

/// PADI bus distributing crossbar output events to synapse drivers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadiBus {
    coordinate: PadiBusOnDls,
}

impl PadiBus {
    /// Creates the vertex.
    pub fn new(coordinate: PadiBusOnDls) -> Self {
        Self { coordinate }
    }

    /// Bus location.
    pub fn coordinate(&self) -> PadiBusOnDls {
        self.coordinate
    }
}

impl VertexProperties for PadiBus {
    const NAME: &'static str = "PadiBus";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::CrossbarOutputLabel)]
    }

    fn output(&self) -> Port {
        Port::new(1, ConnectionType::SynapseDriverInputLabel)
    }

    fn variadic_input(&self) -> bool {
        true
    }

    fn supports_input_from(&self, source: &Vertex, _restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::CrossbarNode(node) => {
                node.coordinate().output == self.coordinate.crossbar_output()
            }
            _ => true,
        }
    }
}
