//! Telemetry counters read before and after an execution.
//!
//! The counters live in the read-only [`map::HEALTH`] region. A snapshot is
//! read with one ticket; the difference of two snapshots yields the activity
//! of the program in between. Crossbar drop counters are 16 bit wide and
//! wrap, so their difference is taken modulo 2^16.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::address::{Address, Word, map};
use crate::builder::{PlaybackProgramBuilder, Ticket};
use crate::coord::{CrossbarInput, CrossbarOutput};
use crate::error::{HardwareError, Result};

/// Number of FPGA links with PHY counters.
pub const PHY_LINKS: usize = 8;

/// Word offsets inside the health region.
pub mod offset {
    /// ARQ read/write/rx/tx counters.
    pub const ARQ: usize = 0;
    /// PHY counters, three words per link.
    pub const PHY: usize = 4;
    /// Crossbar input drop counters.
    pub const CROSSBAR_INPUT_DROP: usize = 0x20;
    /// Crossbar output event counters.
    pub const CROSSBAR_OUTPUT_EVENT: usize = 0x40;
    /// Words covered by a snapshot.
    pub const WORDS: usize = 0x4c;
}

/// ARQ (reliable transport) counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArqCounters {
    /// Read requests.
    pub read_count: u32,
    /// Write requests.
    pub write_count: u32,
    /// Received packets.
    pub rx_count: u32,
    /// Transmitted packets.
    pub tx_count: u32,
}

/// Per-link PHY counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyCounters {
    /// Received words.
    pub rx_count: u32,
    /// Transmitted words.
    pub tx_count: u32,
    /// CRC errors.
    pub crc_error_count: u32,
}

/// Health counters of one chip.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// ARQ counters.
    pub arq: ArqCounters,
    /// PHY counters per link.
    pub phy: [PhyCounters; PHY_LINKS],
    /// Dropped events per crossbar input.
    pub crossbar_input_drop: [u32; CrossbarInput::SIZE],
    /// Forwarded events per crossbar output.
    pub crossbar_output_event: [u32; CrossbarOutput::SIZE],
}

impl HealthSnapshot {
    /// Appends a read of all counters.
    pub fn read(builder: &mut PlaybackProgramBuilder) -> Ticket {
        builder.read(Address(map::HEALTH), offset::WORDS)
    }

    /// Decodes a snapshot from an executed ticket.
    pub fn from_ticket(ticket: &Ticket) -> Result<Self> {
        Self::from_words(ticket.get()?)
    }

    /// Decodes a snapshot from the words of the health region.
    pub fn from_words(words: &[Word]) -> Result<Self> {
        if words.len() < offset::WORDS {
            return Err(HardwareError::UnknownAddress(
                Address(map::HEALTH).offset(words.len()),
            ));
        }
        let w = |i: usize| words[i].0;
        let mut snapshot = Self {
            arq: ArqCounters {
                read_count: w(offset::ARQ),
                write_count: w(offset::ARQ + 1),
                rx_count: w(offset::ARQ + 2),
                tx_count: w(offset::ARQ + 3),
            },
            ..Self::default()
        };
        for (i, phy) in snapshot.phy.iter_mut().enumerate() {
            let base = offset::PHY + 3 * i;
            *phy = PhyCounters {
                rx_count: w(base),
                tx_count: w(base + 1),
                crc_error_count: w(base + 2),
            };
        }
        for (i, c) in snapshot.crossbar_input_drop.iter_mut().enumerate() {
            *c = w(offset::CROSSBAR_INPUT_DROP + i) & 0xffff;
        }
        for (i, c) in snapshot.crossbar_output_event.iter_mut().enumerate() {
            *c = w(offset::CROSSBAR_OUTPUT_EVENT + i);
        }
        Ok(snapshot)
    }

    /// Encodes into the words of the health region.
    pub fn to_words(&self) -> Vec<Word> {
        let mut words = vec![Word(0); offset::WORDS];
        words[offset::ARQ] = Word(self.arq.read_count);
        words[offset::ARQ + 1] = Word(self.arq.write_count);
        words[offset::ARQ + 2] = Word(self.arq.rx_count);
        words[offset::ARQ + 3] = Word(self.arq.tx_count);
        for (i, phy) in self.phy.iter().enumerate() {
            let base = offset::PHY + 3 * i;
            words[base] = Word(phy.rx_count);
            words[base + 1] = Word(phy.tx_count);
            words[base + 2] = Word(phy.crc_error_count);
        }
        for (i, c) in self.crossbar_input_drop.iter().enumerate() {
            words[offset::CROSSBAR_INPUT_DROP + i] = Word(c & 0xffff);
        }
        for (i, c) in self.crossbar_output_event.iter().enumerate() {
            words[offset::CROSSBAR_OUTPUT_EVENT + i] = Word(*c);
        }
        words
    }

    /// Activity between `before` and `self`.
    pub fn since(&self, before: &HealthSnapshot) -> HealthSnapshot {
        let mut delta = self.clone();
        delta.arq.read_count = delta.arq.read_count.wrapping_sub(before.arq.read_count);
        delta.arq.write_count = delta.arq.write_count.wrapping_sub(before.arq.write_count);
        delta.arq.rx_count = delta.arq.rx_count.wrapping_sub(before.arq.rx_count);
        delta.arq.tx_count = delta.arq.tx_count.wrapping_sub(before.arq.tx_count);
        for (d, b) in delta.phy.iter_mut().zip(&before.phy) {
            d.rx_count = d.rx_count.wrapping_sub(b.rx_count);
            d.tx_count = d.tx_count.wrapping_sub(b.tx_count);
            d.crc_error_count = d.crc_error_count.wrapping_sub(b.crc_error_count);
        }
        for (d, b) in delta.crossbar_input_drop.iter_mut().zip(&before.crossbar_input_drop) {
            *d = d.wrapping_sub(*b) & 0xffff;
        }
        for (d, b) in delta
            .crossbar_output_event
            .iter_mut()
            .zip(&before.crossbar_output_event)
        {
            *d = d.wrapping_sub(*b);
        }
        delta
    }

    /// Total dropped events over all crossbar inputs.
    pub fn total_drops(&self) -> u64 {
        self.crossbar_input_drop.iter().map(|&c| u64::from(c)).sum()
    }
}

impl AddAssign<&HealthSnapshot> for HealthSnapshot {
    fn add_assign(&mut self, rhs: &HealthSnapshot) {
        self.arq.read_count = self.arq.read_count.wrapping_add(rhs.arq.read_count);
        self.arq.write_count = self.arq.write_count.wrapping_add(rhs.arq.write_count);
        self.arq.rx_count = self.arq.rx_count.wrapping_add(rhs.arq.rx_count);
        self.arq.tx_count = self.arq.tx_count.wrapping_add(rhs.arq.tx_count);
        for (s, r) in self.phy.iter_mut().zip(&rhs.phy) {
            s.rx_count = s.rx_count.wrapping_add(r.rx_count);
            s.tx_count = s.tx_count.wrapping_add(r.tx_count);
            s.crc_error_count = s.crc_error_count.wrapping_add(r.crc_error_count);
        }
        for (s, r) in self.crossbar_input_drop.iter_mut().zip(&rhs.crossbar_input_drop) {
            *s = s.wrapping_add(*r);
        }
        for (s, r) in self
            .crossbar_output_event
            .iter_mut()
            .zip(&rhs.crossbar_output_event)
        {
            *s = s.wrapping_add(*r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_roundtrip() {
        let mut snapshot = HealthSnapshot::default();
        snapshot.arq.tx_count = 12;
        snapshot.phy[3].crc_error_count = 2;
        snapshot.crossbar_input_drop[19] = 0xfffe;
        snapshot.crossbar_output_event[11] = 7;
        assert_eq!(HealthSnapshot::from_words(&snapshot.to_words()).unwrap(), snapshot);
        assert!(HealthSnapshot::from_words(&[Word(0); 3]).is_err());
    }

    #[test]
    fn drop_counter_difference_wraps_at_16_bit() {
        let mut before = HealthSnapshot::default();
        before.crossbar_input_drop[0] = 0xfffe;
        let mut after = HealthSnapshot::default();
        after.crossbar_input_drop[0] = 0x0003;
        after.arq.read_count = 10;
        before.arq.read_count = 4;

        let delta = after.since(&before);
        assert_eq!(delta.crossbar_input_drop[0], 5);
        assert_eq!(delta.arq.read_count, 6);
        assert_eq!(delta.total_drops(), 5);

        let mut sum = delta.clone();
        sum += &delta;
        assert_eq!(sum.arq.read_count, 12);
    }
}
