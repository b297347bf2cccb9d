//! Execution instance identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use sigflow_hw::ChipOnExecutor;

/// One physically placed, temporally ordered slice of computation.
///
/// The identifier combines a logical step index with the chip the step runs
/// on. Its total order is only a storage order; dependencies between
/// instances are expressed solely by the execution instance graph.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ExecutionInstanceId {
    /// Logical step index.
    pub step: u32,
    /// Chip the instance is placed on.
    pub chip: ChipOnExecutor,
}

impl ExecutionInstanceId {
    /// Creates an identifier.
    pub const fn new(step: u32, chip: ChipOnExecutor) -> Self {
        Self { step, chip }
    }

    /// Identifier with step `step` on the default chip.
    pub const fn step(step: u32) -> Self {
        Self {
            step,
            chip: ChipOnExecutor::new(
                sigflow_hw::ConnectionOnExecutor(0),
                sigflow_hw::ChipOnConnection(0),
            ),
        }
    }
}

impl fmt::Display for ExecutionInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EI({}, {})", self.step, self.chip)
    }
}
