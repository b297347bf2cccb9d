//! Host data vertices.

use serde::{Deserialize, Serialize};

use super::{VertexProperties, invalid};
use crate::connection_type::ConnectionType;
use crate::error::Result;
use crate::port::Port;

fn is_event_sequence(t: ConnectionType) -> bool {
    matches!(
        t,
        ConnectionType::TimedSpikeToChipSequence
            | ConnectionType::TimedSpikeFromChipSequence
            | ConnectionType::TimedMADCSampleFromChipSequence
    )
}

/// Moves host data into an execution instance.
///
/// Input is the `Data*` form of the output type; the value itself is taken
/// from the connected source after it was materialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInput {
    output_type: ConnectionType,
    size: usize,
}

impl DataInput {
    /// Creates the vertex.
    ///
    /// `output_type` must have a host-data counterpart; event sequences have
    /// size one.
    pub fn new(output_type: ConnectionType, size: usize) -> Result<Self> {
        if output_type.to_data().is_none() {
            return Err(invalid(Self::NAME, format!("{output_type:?} has no host-data form")));
        }
        if is_event_sequence(output_type) && size != 1 {
            return Err(invalid(Self::NAME, "event sequences have size 1"));
        }
        Ok(Self { output_type, size })
    }

    /// Value type delivered into the execution instance.
    pub fn output_type(&self) -> ConnectionType {
        self.output_type
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl VertexProperties for DataInput {
    const NAME: &'static str = "DataInput";

    fn inputs(&self) -> Vec<Port> {
        let data = self.output_type.to_data().unwrap_or(self.output_type);
        vec![Port::new(self.size, data)]
    }

    fn output(&self) -> Port {
        Port::new(self.size, self.output_type)
    }

    fn can_connect_different_execution_instances(&self) -> bool {
        true
    }
}

/// Moves values out of an execution instance into host data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOutput {
    input_type: ConnectionType,
    size: usize,
}

impl DataOutput {
    /// Creates the vertex.
    pub fn new(input_type: ConnectionType, size: usize) -> Result<Self> {
        if input_type.to_data().is_none() {
            return Err(invalid(Self::NAME, format!("{input_type:?} has no host-data form")));
        }
        if is_event_sequence(input_type) && size != 1 {
            return Err(invalid(Self::NAME, "event sequences have size 1"));
        }
        Ok(Self { input_type, size })
    }

    /// Value type taken from the execution instance.
    pub fn input_type(&self) -> ConnectionType {
        self.input_type
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl VertexProperties for DataOutput {
    const NAME: &'static str = "DataOutput";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(self.size, self.input_type)]
    }

    fn output(&self) -> Port {
        Port::new(self.size, self.input_type.to_data().unwrap_or(self.input_type))
    }

    fn can_connect_different_execution_instances(&self) -> bool {
        true
    }
}

/// Data supplied by the caller in the input data map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInput {
    output_type: ConnectionType,
    size: usize,
}

impl ExternalInput {
    /// Creates the vertex; `output_type` must be a `Data*` type.
    pub fn new(output_type: ConnectionType, size: usize) -> Result<Self> {
        if !output_type.is_data() {
            return Err(invalid(Self::NAME, format!("{output_type:?} is not host data")));
        }
        Ok(Self { output_type, size })
    }

    /// Host-data type supplied.
    pub fn output_type(&self) -> ConnectionType {
        self.output_type
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl VertexProperties for ExternalInput {
    const NAME: &'static str = "ExternalInput";

    fn inputs(&self) -> Vec<Port> {
        Vec::new()
    }

    fn output(&self) -> Port {
        Port::new(self.size, self.output_type)
    }
}
