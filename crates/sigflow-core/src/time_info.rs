//! Wall-clock timing of an execution.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use sigflow_hw::ChipOnExecutor;

use crate::execution_instance::ExecutionInstanceId;

/// Time spent executing, in total and broken down by hardware and instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionTimeInfo {
    /// Wall time of the whole run.
    pub execution_duration: Duration,
    /// Time the hardware was busy running programs, per chip.
    pub execution_duration_per_hardware: BTreeMap<ChipOnExecutor, Duration>,
    /// Accumulated realtime interval length per execution instance.
    pub realtime_duration_per_execution_instance: BTreeMap<ExecutionInstanceId, Duration>,
}

impl ExecutionTimeInfo {
    /// Adds the durations of `other`, key by key.
    pub fn merge(&mut self, other: ExecutionTimeInfo) {
        self.execution_duration += other.execution_duration;
        for (chip, d) in other.execution_duration_per_hardware {
            *self.execution_duration_per_hardware.entry(chip).or_default() += d;
        }
        for (ei, d) in other.realtime_duration_per_execution_instance {
            *self
                .realtime_duration_per_execution_instance
                .entry(ei)
                .or_default() += d;
        }
    }
}

impl fmt::Display for ExecutionTimeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "execution duration: {:?}", self.execution_duration)?;
        for (chip, d) in &self.execution_duration_per_hardware {
            writeln!(f, "  hardware {chip}: {d:?}")?;
        }
        for (ei, d) in &self.realtime_duration_per_execution_instance {
            writeln!(f, "  realtime {ei}: {d:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_per_key() {
        let chip = ChipOnExecutor::default();
        let ei = ExecutionInstanceId::step(0);
        let mut a = ExecutionTimeInfo {
            execution_duration: Duration::from_millis(2),
            execution_duration_per_hardware: BTreeMap::from([(chip, Duration::from_millis(1))]),
            realtime_duration_per_execution_instance: BTreeMap::new(),
        };
        let b = ExecutionTimeInfo {
            execution_duration: Duration::from_millis(3),
            execution_duration_per_hardware: BTreeMap::from([(chip, Duration::from_millis(4))]),
            realtime_duration_per_execution_instance: BTreeMap::from([(
                ei,
                Duration::from_micros(7),
            )]),
        };
        a.merge(b);
        assert_eq!(a.execution_duration, Duration::from_millis(5));
        assert_eq!(a.execution_duration_per_hardware[&chip], Duration::from_millis(5));
        assert_eq!(a.realtime_duration_per_execution_instance[&ei], Duration::from_micros(7));
        assert!(a.to_string().contains("execution duration"));
    }
}
