//! Synapse driver.

use serde::{Deserialize, Serialize};
use sigflow_hw::chip::SynapseDriverConfig;
use sigflow_hw::coord::SynapseDriverOnDls;

use super::{Vertex, VertexProperties};
use crate::connection_type::ConnectionType;
use crate::port::{Port, PortRestriction};

/// Synapse driver forwarding PADI events to its two synapse rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynapseDriver {
    coordinate: SynapseDriverOnDls,
    config: SynapseDriverConfig,
}

impl SynapseDriver {
    /// Creates the vertex. The receiver is enabled when configured.
    pub fn new(coordinate: SynapseDriverOnDls, config: SynapseDriverConfig) -> Self {
        Self { coordinate, config }
    }

    /// Driver location.
    pub fn coordinate(&self) -> SynapseDriverOnDls {
        self.coordinate
    }

    /// Driver configuration.
    pub fn config(&self) -> &SynapseDriverConfig {
        &self.config
    }
}

impl VertexProperties for SynapseDriver {
    const NAME: &'static str = "SynapseDriver";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::SynapseDriverInputLabel)]
    }

    fn output(&self) -> Port {
        Port::new(1, ConnectionType::SynapseInputLabel)
    }

    fn supports_input_from(&self, source: &Vertex, _restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::PadiBus(bus) => bus.coordinate() == self.coordinate.padi_bus(),
            _ => true,
        }
    }
}
