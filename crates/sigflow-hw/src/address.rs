//! Register address map.
//!
//! Every configurable or readable container lives at a 32-bit word
//! [`Address`]. Static configuration occupies the regions below
//! [`map::EXTERNAL_PPU_MEMORY`]; the regions starting at
//! [`map::EVENT_RECORDING`] are control and status registers that are only
//! touched by instructions, never by a configuration image.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coord::Hemisphere;

/// Word address on the chip or FPGA.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(pub u32);

/// 32-bit data word.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Word(pub u32);

impl Address {
    /// Address `offset` words after `self`.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn offset(self, offset: usize) -> Address {
        Address(self.0 + offset as u32)
    }

    /// Base of the 64 KiB region containing this address.
    pub const fn region(self) -> u32 {
        self.0 & 0xffff_0000
    }

    /// Whether this address configures analog bias cells.
    pub const fn is_capmem(self) -> bool {
        let region = self.region();
        region == map::CAPMEM[0] || region == map::CAPMEM[1]
    }
}

impl Word {
    /// Raw value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether bit `bit` is set.
    #[inline]
    pub const fn bit(self, bit: u32) -> bool {
        (self.0 >> bit) & 1 == 1
    }

    /// Extracts `width` bits starting at `shift`.
    #[inline]
    pub const fn field(self, shift: u32, width: u32) -> u32 {
        (self.0 >> shift) & ((1 << width) - 1)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Region bases.
pub mod map {
    /// Neuron configuration, one word per neuron (top row first).
    pub const NEURON: u32 = 0x0001_0000;
    /// Neuron event output enables, one word per output.
    pub const NEURON_EVENT_OUTPUT: u32 = 0x0001_1000;
    /// Synapse driver configuration, one word per driver.
    pub const SYNAPSE_DRIVER: u32 = 0x0002_0000;
    /// PADI bus configuration, one word per bus.
    pub const PADI_BUS: u32 = 0x0002_1000;
    /// Crossbar node configuration, one word per node.
    pub const CROSSBAR_NODE: u32 = 0x0003_0000;
    /// Crossbar output configuration, one word per output.
    pub const CROSSBAR_OUTPUT: u32 = 0x0003_1000;
    /// Background spike sources, three words per source.
    pub const BACKGROUND_SPIKE_SOURCE: u32 = 0x0003_2000;
    /// MADC readout chain configuration.
    pub const READOUT: u32 = 0x0004_0000;
    /// CADC configuration, one word per hemisphere.
    pub const CADC: u32 = 0x0004_1000;
    /// Synapse matrix, per hemisphere; two synapses per word.
    pub const SYNAPSE: [u32; 2] = [0x0010_0000, 0x0011_0000];
    /// Analog bias cells, per hemisphere.
    pub const CAPMEM: [u32; 2] = [0x0014_0000, 0x0015_0000];
    /// PPU internal memory, per hemisphere.
    pub const PPU_MEMORY: [u32; 2] = [0x0020_0000, 0x0021_0000];
    /// PPU control (offset 0) and status (offset 1) registers, per hemisphere.
    pub const PPU_CONTROL: [u32; 2] = [0x0022_0000, 0x0022_0010];
    /// PPU external memory, big-endian words.
    pub const EXTERNAL_PPU_MEMORY: u32 = 0x0080_0000;
    /// FPGA-side DRAM usable by the PPU, big-endian words.
    pub const EXTERNAL_DRAM: u32 = 0x0100_0000;
    /// Event recording enable (bit 0).
    pub const EVENT_RECORDING: u32 = 0x0F00_0000;
    /// MADC control: bit 0 arm/wake-up, bit 1 start, bit 2 stop.
    pub const MADC_CONTROL: u32 = 0x0F00_0010;
    /// Instruction timeout in FPGA cycles applied to subsequent polls.
    pub const INSTRUCTION_TIMEOUT: u32 = 0x0F00_0020;
    /// Neuron reset trigger, eight mask words per hemisphere. Writing word
    /// `w` resets the columns `32 * w + b` whose bit `b` is set.
    pub const NEURON_RESET: u32 = 0x0F01_0000;
    /// Read-only telemetry counters.
    pub const HEALTH: u32 = 0x0F10_0000;
    /// Reads return zero; used for timestamped barriers.
    pub const NULL_PAYLOAD: u32 = 0x0FFF_FFFF;
}

/// Neuron configuration register.
pub const fn neuron(hemisphere: Hemisphere, column: usize) -> Address {
    Address(map::NEURON).offset(hemisphere.value() * 256 + column)
}

/// Synapse word holding columns `2 * (column / 2)` and the next one.
pub const fn synapse(hemisphere: Hemisphere, row: usize, column: usize) -> Address {
    Address(map::SYNAPSE[hemisphere.value()]).offset(row * 128 + column / 2)
}

/// CapMem cell.
pub const fn capmem(hemisphere: Hemisphere, cell: usize) -> Address {
    Address(map::CAPMEM[hemisphere.value()]).offset(cell)
}

/// PPU internal memory word.
pub const fn ppu_memory(hemisphere: Hemisphere, word: usize) -> Address {
    Address(map::PPU_MEMORY[hemisphere.value()]).offset(word)
}

/// PPU control register.
pub const fn ppu_control(hemisphere: Hemisphere) -> Address {
    Address(map::PPU_CONTROL[hemisphere.value()])
}

/// PPU status register.
pub const fn ppu_status(hemisphere: Hemisphere) -> Address {
    Address(map::PPU_CONTROL[hemisphere.value()]).offset(1)
}

/// Words of the neuron reset trigger per hemisphere.
pub const NEURON_RESET_WORDS: usize = 8;

/// Neuron reset trigger word covering columns `32 * word..32 * word + 32`.
pub const fn neuron_reset(hemisphere: Hemisphere, word: usize) -> Address {
    Address(map::NEURON_RESET).offset(hemisphere.value() * NEURON_RESET_WORDS + word)
}

/// External PPU memory word containing byte `byte`.
pub const fn external_ppu_memory(byte: usize) -> Address {
    Address(map::EXTERNAL_PPU_MEMORY).offset(byte / 4)
}

/// External DRAM word containing byte `byte`.
pub const fn external_dram(byte: usize) -> Address {
    Address(map::EXTERNAL_DRAM).offset(byte / 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capmem_detection() {
        assert!(capmem(Hemisphere::Top, 3).is_capmem());
        assert!(capmem(Hemisphere::Bottom, 511).is_capmem());
        assert!(!neuron(Hemisphere::Top, 0).is_capmem());
        assert!(!synapse(Hemisphere::Bottom, 255, 255).is_capmem());
    }

    #[test]
    fn word_fields() {
        let w = Word(0b1011_0100);
        assert!(w.bit(2));
        assert!(!w.bit(0));
        assert_eq!(w.field(4, 4), 0b1011);
    }

    #[test]
    fn helpers_compose_addresses() {
        assert_eq!(synapse(Hemisphere::Top, 1, 3), Address(0x0010_0081));
        assert_eq!(ppu_status(Hemisphere::Bottom), Address(0x0022_0011));
        assert_eq!(external_ppu_memory(9), Address(0x0080_0002));
        assert_eq!(format!("{}", Address(0x10)), "0x00000010");
    }
}
