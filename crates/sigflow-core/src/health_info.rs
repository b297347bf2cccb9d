//! Health counters accumulated over an execution.

use std::collections::BTreeMap;

use sigflow_hw::HealthSnapshot;

use crate::execution_instance::ExecutionInstanceId;

/// Counter activity per execution instance.
///
/// Each value is the difference of snapshots read directly before and after
/// the instance's programs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionHealthInfo {
    /// Counter deltas.
    pub execution_instances: BTreeMap<ExecutionInstanceId, HealthSnapshot>,
}

impl ExecutionHealthInfo {
    /// Sums the counters of `other` into `self`.
    pub fn merge(&mut self, other: ExecutionHealthInfo) {
        for (ei, snapshot) in other.execution_instances {
            *self.execution_instances.entry(ei).or_default() += &snapshot;
        }
    }

    /// Total dropped crossbar events.
    pub fn total_drops(&self) -> u64 {
        self.execution_instances
            .values()
            .map(HealthSnapshot::total_drops)
            .sum()
    }
}
