//! Background spike source.

use serde::{Deserialize, Serialize};
use sigflow_hw::chip::BackgroundSpikeSourceConfig;
use sigflow_hw::coord::BackgroundSpikeSourceOnDls;

use super::VertexProperties;
use crate::connection_type::ConnectionType;
use crate::port::Port;

/// On-chip spike generator feeding one crossbar input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundSpikeSource {
    coordinate: BackgroundSpikeSourceOnDls,
    config: BackgroundSpikeSourceConfig,
}

impl BackgroundSpikeSource {
    /// Creates the vertex.
    pub fn new(coordinate: BackgroundSpikeSourceOnDls, config: BackgroundSpikeSourceConfig) -> Self {
        Self { coordinate, config }
    }

    /// Source location.
    pub fn coordinate(&self) -> BackgroundSpikeSourceOnDls {
        self.coordinate
    }

    /// Source configuration.
    pub fn config(&self) -> &BackgroundSpikeSourceConfig {
        &self.config
    }
}

impl VertexProperties for BackgroundSpikeSource {
    const NAME: &'static str = "BackgroundSpikeSource";

    fn inputs(&self) -> Vec<Port> {
        Vec::new()
    }

    fn output(&self) -> Port {
        Port::new(1, ConnectionType::CrossbarInputLabel)
    }
}
