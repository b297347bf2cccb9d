//! On-chip processor (PPU) memory, symbols, commands and image layout.
//!
//! Both the program generator and the simulated backend agree on the image
//! layout defined here. A PPU image starts with a fixed header whose words
//! point at the symbols the generator allocated, followed by the rule table:
//!
//! ```text
//!  word  0         MAGIC
//!  word  1         flags (bit 0 periodic CADC, bit 1 periodic CADC on DRAM)
//!  word  2         number of rules
//!  word  3         periodic CADC sample capacity
//!  words 4..=10    status, cadc_result, runtime, neuron_reset_mask, mailbox,
//!                  scheduler drop counter, stopped  (word offsets)
//!  word  11        ppu location (word offset)
//!  words 12, 13    periodic CADC sample buffer, top/bottom (byte offsets)
//!  word  14        first timer drop counter (word offset, one per rule)
//!  word  15        periodic CADC readout memory offset (word offset)
//!  word  16        periodic CADC FPGA wait clock cycles
//!  words 24..      rule entries, RULE_WORDS each
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chip::{EXTERNAL_PPU_MEMORY_BYTES, PPU_MEMORY_WORDS};
use crate::coord::NeuronColumn;
use crate::error::{HardwareError, Result};

/// Alignment of vector-unit rows in bytes.
pub const VECTOR_ALIGNMENT: usize = 128;

/// Bytes in one vector-unit row (one byte per neuron column).
pub const VECTOR_ROW_BYTES: usize = 2 * VECTOR_ALIGNMENT;

/// Block of PPU internal memory, in words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PpuMemoryBlock {
    /// First word.
    pub offset: usize,
    /// Number of words.
    pub size: usize,
}

impl PpuMemoryBlock {
    /// Creates a block, checking that it fits into PPU memory.
    pub fn new(offset: usize, size: usize) -> Result<Self> {
        if offset + size > PPU_MEMORY_WORDS {
            return Err(HardwareError::PpuBlockOutOfRange {
                offset: offset * 4,
                size: size * 4,
                capacity: PPU_MEMORY_WORDS * 4,
            });
        }
        Ok(Self { offset, size })
    }
}

/// Block of byte-addressed external memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalPpuMemoryBlock {
    /// First byte.
    pub offset: usize,
    /// Number of bytes.
    pub size: usize,
}

impl ExternalPpuMemoryBlock {
    /// Creates a block in PPU external memory, checking the capacity.
    pub fn new(offset: usize, size: usize) -> Result<Self> {
        if offset + size > EXTERNAL_PPU_MEMORY_BYTES {
            return Err(HardwareError::PpuBlockOutOfRange {
                offset,
                size,
                capacity: EXTERNAL_PPU_MEMORY_BYTES,
            });
        }
        Ok(Self { offset, size })
    }

    /// Creates a block in external DRAM.
    pub const fn in_dram(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }
}

/// Where a symbol lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolLocation {
    /// Internal memory, same block on both hemispheres.
    Internal(PpuMemoryBlock),
    /// PPU external memory.
    External(ExternalPpuMemoryBlock),
    /// FPGA-side DRAM.
    ExternalDram(ExternalPpuMemoryBlock),
}

/// Symbol table of a PPU program.
pub type PpuSymbols = BTreeMap<String, SymbolLocation>;

/// Internal memory block of symbol `name`.
pub fn internal_block(symbols: &PpuSymbols, name: &str) -> Result<PpuMemoryBlock> {
    match symbols.get(name) {
        Some(SymbolLocation::Internal(block)) => Ok(*block),
        _ => Err(HardwareError::UnknownSymbol(name.to_owned())),
    }
}

/// Command word written to the `status` symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PpuCommand {
    /// Nothing to do; written back by the PPU when a command finished.
    Idle,
    /// Read the CADC into the baseline buffer.
    BaselineRead,
    /// Read the CADC into `cadc_result`.
    Read,
    /// Reset neurons selected by `neuron_reset_mask`.
    ResetNeurons,
    /// Run the plasticity rule scheduler until `runtime` elapsed.
    Scheduler,
    /// Start periodic CADC sampling.
    PeriodicRead,
    /// Stop periodic CADC sampling.
    StopPeriodicRead,
    /// Leave the main loop and go to sleep.
    Stop,
}

impl PpuCommand {
    /// Encoded command word.
    pub const fn word(self) -> u32 {
        match self {
            PpuCommand::Idle => 0,
            PpuCommand::BaselineRead => 1,
            PpuCommand::Read => 2,
            PpuCommand::ResetNeurons => 3,
            PpuCommand::Scheduler => 4,
            PpuCommand::PeriodicRead => 5,
            PpuCommand::StopPeriodicRead => 6,
            PpuCommand::Stop => 7,
        }
    }

    /// Decodes a command word.
    pub const fn from_word(word: u32) -> Option<Self> {
        Some(match word {
            0 => PpuCommand::Idle,
            1 => PpuCommand::BaselineRead,
            2 => PpuCommand::Read,
            3 => PpuCommand::ResetNeurons,
            4 => PpuCommand::Scheduler,
            5 => PpuCommand::PeriodicRead,
            6 => PpuCommand::StopPeriodicRead,
            7 => PpuCommand::Stop,
            _ => return None,
        })
    }
}

/// PPU control register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PpuControlRegister {
    /// Release the processor from reset so it runs its program.
    pub inhibit_reset: bool,
}

impl PpuControlRegister {
    /// Encoded register word.
    pub const fn word(self) -> u32 {
        self.inhibit_reset as u32
    }
}

/// Bit of the status register set while the PPU sleeps.
pub const STATUS_SLEEP: u32 = 1;

/// Byte index of `column` in a vector-unit row.
///
/// Even columns occupy the first half of the row, odd ones the second;
/// within a half, byte order inside each big-endian word is reversed.
pub const fn vector_unit_index(column: NeuronColumn) -> usize {
    let c = column.value();
    let j = c / 2;
    (VECTOR_ALIGNMENT - 1) - ((j / 4) * 4 + (3 - j % 4)) + (c % 2) * VECTOR_ALIGNMENT
}

/// Lays out one byte per column into a vector-unit row.
#[allow(clippy::cast_sign_loss)]
pub fn to_vector_unit_row(values: &[i8]) -> Vec<u8> {
    let mut row = vec![0u8; VECTOR_ROW_BYTES];
    for (column, &v) in NeuronColumn::iter_all().zip(values) {
        row[vector_unit_index(column)] = v as u8;
    }
    row
}

/// Inverse of [`to_vector_unit_row`].
#[allow(clippy::cast_possible_wrap)]
pub fn from_vector_unit_row(row: &[u8]) -> Vec<i8> {
    NeuronColumn::iter_all()
        .map(|c| row.get(vector_unit_index(c)).map_or(0, |&b| b as i8))
        .collect()
}

/// Packs bytes into big-endian words, zero-padding the last word.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut w = [0u8; 4];
            w[..c.len()].copy_from_slice(c);
            u32::from_be_bytes(w)
        })
        .collect()
}

/// Unpacks big-endian words into bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Layout of the generated PPU image.
pub mod image {
    /// Image magic ("SGFL").
    pub const MAGIC: u32 = 0x5347_464c;
    /// Header words.
    pub const HEADER_WORDS: usize = 24;
    /// Words per rule entry.
    pub const RULE_WORDS: usize = 10;

    /// Header word indices.
    pub mod word {
        #![allow(missing_docs)]
        pub const MAGIC: usize = 0;
        pub const FLAGS: usize = 1;
        pub const NUM_RULES: usize = 2;
        pub const NUM_PERIODIC_CADC_SAMPLES: usize = 3;
        pub const STATUS: usize = 4;
        pub const CADC_RESULT: usize = 5;
        pub const RUNTIME: usize = 6;
        pub const NEURON_RESET_MASK: usize = 7;
        pub const MAILBOX: usize = 8;
        pub const SCHEDULER_EVENT_DROP_COUNT: usize = 9;
        pub const STOPPED: usize = 10;
        pub const PPU: usize = 11;
        pub const PERIODIC_CADC_SAMPLES_TOP: usize = 12;
        pub const PERIODIC_CADC_SAMPLES_BOTTOM: usize = 13;
        pub const TIMER_EVENT_DROP_COUNT: usize = 14;
        pub const PERIODIC_CADC_READOUT_MEMORY_OFFSET: usize = 15;
        pub const PERIODIC_CADC_FPGA_WAIT_CLOCK_CYCLES: usize = 16;
    }

    /// Header flag bits.
    pub mod flag {
        #![allow(missing_docs)]
        pub const PERIODIC_CADC: u32 = 1 << 0;
        pub const PERIODIC_CADC_ON_DRAM: u32 = 1 << 1;
    }
}

/// Layout of a periodic CADC sample buffer.
///
/// ```text
///  0          4             128                 128 + 384
///  ├──────────┼─────────────┼────────┬─────┬─────┼─ ─ ─
///  │ count BE │ pad         │ time BE│ pad │ row │ sample 1 ...
///  └──────────┴─────────────┴────────┴─────┴─────┴─ ─ ─
/// ```
///
/// Each sample holds a big-endian 64-bit PPU timestamp followed, one vector
/// alignment later, by a vector-unit row of CADC values.
pub mod periodic {
    use super::{VECTOR_ALIGNMENT, VECTOR_ROW_BYTES};

    /// Bytes before the first sample.
    pub const HEADER_BYTES: usize = VECTOR_ALIGNMENT;
    /// Offset of the row within a sample.
    pub const ROW_OFFSET: usize = VECTOR_ALIGNMENT;
    /// Bytes per sample.
    pub const SAMPLE_BYTES: usize = VECTOR_ALIGNMENT + VECTOR_ROW_BYTES;
    /// FPGA cycles between two samples taken by the PPU.
    pub const SAMPLE_PERIOD_CYCLES: u64 = 250;

    /// Bytes of a buffer holding `capacity` samples.
    pub const fn buffer_bytes(capacity: usize) -> usize {
        HEADER_BYTES + capacity * SAMPLE_BYTES
    }

    /// Byte offset of sample `index` relative to the buffer start.
    pub const fn sample_offset(index: usize) -> usize {
        HEADER_BYTES + index * SAMPLE_BYTES
    }
}

/// Recording performed by a rule every period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingKind {
    /// Nothing recorded.
    #[default]
    None,
    /// Raw scratchpad memory copy.
    Raw,
    /// Timestamped observables.
    Timed,
}

/// One rule of the generated image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpuRuleEntry {
    /// Rule identifier.
    pub id: u32,
    /// First invocation relative to scheduler start, PPU cycles.
    pub timer_start: u32,
    /// PPU cycles between invocations.
    pub period: u32,
    /// Number of invocations.
    pub num_periods: u32,
    /// Recording kind.
    pub recording: RecordingKind,
    /// Bytes recorded per invocation.
    pub recording_size: u32,
    /// Byte offset of the top hemisphere recording buffer.
    pub recording_top: u32,
    /// Byte offset of the bottom hemisphere recording buffer.
    pub recording_bottom: u32,
    /// Invocation index offset of this realtime column in the recording buffer.
    pub first_period: u32,
    /// First neuron column the rule observes.
    pub first_column: u32,
}

impl PpuRuleEntry {
    fn to_words(self) -> [u32; image::RULE_WORDS] {
        [
            self.id,
            self.timer_start,
            self.period,
            self.num_periods,
            match self.recording {
                RecordingKind::None => 0,
                RecordingKind::Raw => 1,
                RecordingKind::Timed => 2,
            },
            self.recording_size,
            self.recording_top,
            self.recording_bottom,
            self.first_period,
            self.first_column,
        ]
    }

    fn from_words(w: &[u32]) -> Self {
        Self {
            id: w[0],
            timer_start: w[1],
            period: w[2],
            num_periods: w[3],
            recording: match w[4] {
                1 => RecordingKind::Raw,
                2 => RecordingKind::Timed,
                _ => RecordingKind::None,
            },
            recording_size: w[5],
            recording_top: w[6],
            recording_bottom: w[7],
            first_period: w[8],
            first_column: w[9],
        }
    }
}

/// Decoded image header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PpuImageHeader {
    /// Flag bits, see [`image::flag`].
    pub flags: u32,
    /// Periodic CADC sample capacity per hemisphere.
    pub num_periodic_cadc_samples: u32,
    /// Word offset of the `status` symbol.
    pub status: u32,
    /// Word offset of the `cadc_result` symbol.
    pub cadc_result: u32,
    /// Word offset of the `runtime` symbol.
    pub runtime: u32,
    /// Word offset of the `neuron_reset_mask` symbol.
    pub neuron_reset_mask: u32,
    /// Word offset of the `mailbox` symbol.
    pub mailbox: u32,
    /// Word offset of the `scheduler_event_drop_count` symbol.
    pub scheduler_event_drop_count: u32,
    /// Word offset of the `stopped` symbol.
    pub stopped: u32,
    /// Word offset of the `ppu` location symbol.
    pub ppu: u32,
    /// Byte offsets of the periodic CADC sample buffers.
    pub periodic_cadc_samples: [u32; 2],
    /// Word offset of the first timer drop counter.
    pub timer_event_drop_count: u32,
    /// Word offset of the periodic readout memory offset symbol.
    pub periodic_cadc_readout_memory_offset: u32,
    /// Clock-domain crossing wait added to PPU timestamps.
    pub periodic_cadc_fpga_wait_clock_cycles: u32,
    /// Rule table.
    pub rules: Vec<PpuRuleEntry>,
}

impl PpuImageHeader {
    /// Words occupied by header and rule table.
    pub fn len(&self) -> usize {
        image::HEADER_WORDS + self.rules.len() * image::RULE_WORDS
    }

    /// Always false; the header has a fixed part.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encodes header and rule table.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u32> {
        use image::word as w;
        let mut words = vec![0u32; image::HEADER_WORDS];
        words[w::MAGIC] = image::MAGIC;
        words[w::FLAGS] = self.flags;
        words[w::NUM_RULES] = self.rules.len() as u32;
        words[w::NUM_PERIODIC_CADC_SAMPLES] = self.num_periodic_cadc_samples;
        words[w::STATUS] = self.status;
        words[w::CADC_RESULT] = self.cadc_result;
        words[w::RUNTIME] = self.runtime;
        words[w::NEURON_RESET_MASK] = self.neuron_reset_mask;
        words[w::MAILBOX] = self.mailbox;
        words[w::SCHEDULER_EVENT_DROP_COUNT] = self.scheduler_event_drop_count;
        words[w::STOPPED] = self.stopped;
        words[w::PPU] = self.ppu;
        words[w::PERIODIC_CADC_SAMPLES_TOP] = self.periodic_cadc_samples[0];
        words[w::PERIODIC_CADC_SAMPLES_BOTTOM] = self.periodic_cadc_samples[1];
        words[w::TIMER_EVENT_DROP_COUNT] = self.timer_event_drop_count;
        words[w::PERIODIC_CADC_READOUT_MEMORY_OFFSET] = self.periodic_cadc_readout_memory_offset;
        words[w::PERIODIC_CADC_FPGA_WAIT_CLOCK_CYCLES] =
            self.periodic_cadc_fpga_wait_clock_cycles;
        for rule in &self.rules {
            words.extend(rule.to_words());
        }
        words
    }

    /// Decodes header and rule table from the start of PPU memory.
    pub fn decode(memory: &[u32]) -> Result<Self> {
        use image::word as w;
        if memory.len() < image::HEADER_WORDS || memory[w::MAGIC] != image::MAGIC {
            return Err(HardwareError::MalformedPpuImage("missing magic".into()));
        }
        let num_rules = memory[w::NUM_RULES] as usize;
        let end = image::HEADER_WORDS + num_rules * image::RULE_WORDS;
        if memory.len() < end {
            return Err(HardwareError::MalformedPpuImage(format!(
                "rule table of {num_rules} rules exceeds memory"
            )));
        }
        Ok(Self {
            flags: memory[w::FLAGS],
            num_periodic_cadc_samples: memory[w::NUM_PERIODIC_CADC_SAMPLES],
            status: memory[w::STATUS],
            cadc_result: memory[w::CADC_RESULT],
            runtime: memory[w::RUNTIME],
            neuron_reset_mask: memory[w::NEURON_RESET_MASK],
            mailbox: memory[w::MAILBOX],
            scheduler_event_drop_count: memory[w::SCHEDULER_EVENT_DROP_COUNT],
            stopped: memory[w::STOPPED],
            ppu: memory[w::PPU],
            periodic_cadc_samples: [
                memory[w::PERIODIC_CADC_SAMPLES_TOP],
                memory[w::PERIODIC_CADC_SAMPLES_BOTTOM],
            ],
            timer_event_drop_count: memory[w::TIMER_EVENT_DROP_COUNT],
            periodic_cadc_readout_memory_offset: memory[w::PERIODIC_CADC_READOUT_MEMORY_OFFSET],
            periodic_cadc_fpga_wait_clock_cycles: memory[w::PERIODIC_CADC_FPGA_WAIT_CLOCK_CYCLES],
            rules: memory[image::HEADER_WORDS..end]
                .chunks(image::RULE_WORDS)
                .map(PpuRuleEntry::from_words)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_unit_index_is_a_permutation() {
        let mut seen = vec![false; VECTOR_ROW_BYTES];
        for c in NeuronColumn::iter_all() {
            let i = vector_unit_index(c);
            assert!(!seen[i], "index {i} used twice");
            seen[i] = true;
        }
        assert_eq!(vector_unit_index(NeuronColumn::new(0)), 124);
        assert_eq!(vector_unit_index(NeuronColumn::new(1)), 252);
    }

    #[test]
    fn vector_unit_row_roundtrip() {
        let values: Vec<i8> = (0..256).map(|i: i32| ((i % 200) - 100) as i8).collect();
        assert_eq!(from_vector_unit_row(&to_vector_unit_row(&values)), values);
    }

    #[test]
    fn header_roundtrip_with_rules() {
        let header = PpuImageHeader {
            flags: image::flag::PERIODIC_CADC,
            num_periodic_cadc_samples: 100,
            status: 200,
            runtime: 201,
            periodic_cadc_fpga_wait_clock_cycles: 1000,
            rules: vec![PpuRuleEntry {
                id: 3,
                period: 500,
                num_periods: 4,
                recording: RecordingKind::Timed,
                ..PpuRuleEntry::default()
            }],
            ..PpuImageHeader::default()
        };
        let words = header.encode();
        assert_eq!(words.len(), header.len());
        assert_eq!(PpuImageHeader::decode(&words).unwrap(), header);
        assert!(PpuImageHeader::decode(&[0; 30]).is_err());
    }

    #[test]
    fn block_capacity_checks() {
        assert!(PpuMemoryBlock::new(4000, 96).is_ok());
        assert!(PpuMemoryBlock::new(4000, 97).is_err());
        assert!(ExternalPpuMemoryBlock::new(0, EXTERNAL_PPU_MEMORY_BYTES + 1).is_err());
        assert_eq!(
            bytes_to_words(&[1, 2, 3, 4, 5]),
            vec![0x0102_0304, 0x0500_0000]
        );
        assert_eq!(words_to_bytes(&[0x0a0b_0c0d]), vec![10, 11, 12, 13]);
    }
}
