//! Spike and MADC event types exchanged with the FPGA.

use serde::{Deserialize, Serialize};

use crate::coord::L2Channel;
use crate::time::{ChipTime, FpgaTime};

/// 16-bit spike label.
///
/// Bits 14..16 select the L2 channel, bits 0..14 carry the neuron label.
/// Once an event arrives at a synapse driver, bits 6..11 are the row select
/// address and bits 0..6 the synapse label.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SpikeLabel(pub u16);

impl SpikeLabel {
    /// Assembles a label from its parts.
    pub const fn new(channel: L2Channel, neuron_label: u16) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let channel = channel.value() as u16;
        Self(channel << 14 | (neuron_label & 0x3fff))
    }

    /// Label seen by synapse drivers: row select and synapse label.
    pub const fn from_synapse(row_select: u8, synapse_label: u8) -> Self {
        Self(((row_select as u16) & 0x1f) << 6 | (synapse_label as u16 & 0x3f))
    }

    /// L2 channel.
    pub const fn l2_channel(self) -> L2Channel {
        L2Channel::new((self.0 >> 14) as usize)
    }

    /// 14-bit neuron label.
    pub const fn neuron_label(self) -> u16 {
        self.0 & 0x3fff
    }

    /// 6-bit synapse label.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn synapse_label(self) -> u8 {
        (self.0 & 0x3f) as u8
    }

    /// 5-bit row select address.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn row_select(self) -> u8 {
        ((self.0 >> 6) & 0x1f) as u8
    }

    /// Raw value.
    pub const fn value(self) -> u16 {
        self.0
    }
}

/// Spike sent to the chip at a time relative to the realtime interval begin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimedSpikeToChip {
    /// Injection time.
    pub time: FpgaTime,
    /// Label of the spike.
    pub label: SpikeLabel,
}

impl TimedSpikeToChip {
    /// Creates a timed spike.
    pub const fn new(time: FpgaTime, label: SpikeLabel) -> Self {
        Self { time, label }
    }
}

/// Spike recorded from the chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpikeFromChip {
    /// Chip timestamp of the event.
    pub chip_time: ChipTime,
    /// FPGA time of arrival.
    pub fpga_time: FpgaTime,
    /// Label of the spike.
    pub label: SpikeLabel,
}

/// MADC channel a sample was taken on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MadcChannel(pub u8);

/// Sample recorded by the MADC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MadcSampleFromChip {
    /// Chip timestamp of the sample.
    pub chip_time: ChipTime,
    /// FPGA time of arrival.
    pub fpga_time: FpgaTime,
    /// 10-bit sample value.
    pub value: u16,
    /// Channel the sample was taken on.
    pub channel: MadcChannel,
}

/// Events carrying a chip timestamp.
pub trait ChipTimed {
    /// Chip timestamp of the event.
    fn chip_time(&self) -> ChipTime;
}

impl ChipTimed for SpikeFromChip {
    fn chip_time(&self) -> ChipTime {
        self.chip_time
    }
}

impl ChipTimed for MadcSampleFromChip {
    fn chip_time(&self) -> ChipTime {
        self.chip_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_fields() {
        let label = SpikeLabel::new(L2Channel::new(2), 0x1234);
        assert_eq!(label.l2_channel(), L2Channel::new(2));
        assert_eq!(label.neuron_label(), 0x1234);

        let label = SpikeLabel::from_synapse(0b10101, 42);
        assert_eq!(label.row_select(), 0b10101);
        assert_eq!(label.synapse_label(), 42);
    }
}
