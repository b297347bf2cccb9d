//! Types of data flowing along graph edges.

use serde::{Deserialize, Serialize};

/// Type of the data carried by a port.
///
/// Hardware-internal types describe on-chip signal paths; they only connect
/// vertices of one execution instance. The `Data*` types describe values
/// materialized in host memory and are the only ones that can flow between
/// execution instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Label arriving at a synapse row.
    SynapseInputLabel,
    /// Unsigned 32-bit host value.
    UInt32,
    /// Unsigned 5-bit host value (synapse activation).
    UInt5,
    /// Signed 8-bit host value.
    Int8,
    /// Current produced by synapse columns.
    SynapticInput,
    /// Membrane voltage of neurons.
    MembraneVoltage,
    /// Spikes injected by the FPGA.
    TimedSpikeToChipSequence,
    /// Spikes recorded by the FPGA.
    TimedSpikeFromChipSequence,
    /// MADC samples recorded by the FPGA.
    TimedMADCSampleFromChipSequence,
    /// Label entering the crossbar.
    CrossbarInputLabel,
    /// Label leaving the crossbar.
    CrossbarOutputLabel,
    /// Label arriving at a synapse driver.
    SynapseDriverInputLabel,
    /// Host data: [`UInt32`](Self::UInt32).
    DataUInt32,
    /// Host data: [`UInt5`](Self::UInt5).
    DataUInt5,
    /// Host data: [`Int8`](Self::Int8).
    DataInt8,
    /// Host data: [`TimedSpikeToChipSequence`](Self::TimedSpikeToChipSequence).
    DataTimedSpikeToChipSequence,
    /// Host data: [`TimedSpikeFromChipSequence`](Self::TimedSpikeFromChipSequence).
    DataTimedSpikeFromChipSequence,
    /// Host data: [`TimedMADCSampleFromChipSequence`](Self::TimedMADCSampleFromChipSequence).
    DataTimedMADCSampleFromChipSequence,
}

impl ConnectionType {
    /// Types allowed on edges between execution instances.
    pub const CROSSABLE: [ConnectionType; 6] = [
        ConnectionType::DataUInt32,
        ConnectionType::DataUInt5,
        ConnectionType::DataInt8,
        ConnectionType::DataTimedSpikeToChipSequence,
        ConnectionType::DataTimedSpikeFromChipSequence,
        ConnectionType::DataTimedMADCSampleFromChipSequence,
    ];

    /// Whether edges of this type may connect different execution instances.
    pub fn can_cross_execution_instances(self) -> bool {
        Self::CROSSABLE.contains(&self)
    }

    /// Host-data counterpart of a value type, `None` for other types.
    pub const fn to_data(self) -> Option<ConnectionType> {
        Some(match self {
            ConnectionType::UInt32 => ConnectionType::DataUInt32,
            ConnectionType::UInt5 => ConnectionType::DataUInt5,
            ConnectionType::Int8 => ConnectionType::DataInt8,
            ConnectionType::TimedSpikeToChipSequence => ConnectionType::DataTimedSpikeToChipSequence,
            ConnectionType::TimedSpikeFromChipSequence => {
                ConnectionType::DataTimedSpikeFromChipSequence
            }
            ConnectionType::TimedMADCSampleFromChipSequence => {
                ConnectionType::DataTimedMADCSampleFromChipSequence
            }
            _ => return None,
        })
    }

    /// Value-type counterpart of a host-data type, `None` for other types.
    pub const fn from_data(self) -> Option<ConnectionType> {
        Some(match self {
            ConnectionType::DataUInt32 => ConnectionType::UInt32,
            ConnectionType::DataUInt5 => ConnectionType::UInt5,
            ConnectionType::DataInt8 => ConnectionType::Int8,
            ConnectionType::DataTimedSpikeToChipSequence => ConnectionType::TimedSpikeToChipSequence,
            ConnectionType::DataTimedSpikeFromChipSequence => {
                ConnectionType::TimedSpikeFromChipSequence
            }
            ConnectionType::DataTimedMADCSampleFromChipSequence => {
                ConnectionType::TimedMADCSampleFromChipSequence
            }
            _ => return None,
        })
    }

    /// Whether this is a `Data*` type.
    pub const fn is_data(self) -> bool {
        self.from_data().is_some()
    }
}
