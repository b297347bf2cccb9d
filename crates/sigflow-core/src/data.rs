//! Host data exchanged with an execution.
//!
//! Every value is batched: a [`DataEntry`] holds one sequence per batch
//! entry. A [`DataSnippet`] maps vertices to entries for one realtime
//! column; [`InputData`] and [`OutputData`] carry one snippet per column.
//!
//! # Validity
//!
//! A snippet is valid when all entries share one batch size and the per-batch
//! runtime list, when present, has that size too.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sigflow_hw::event::MadcChannel;
use sigflow_hw::{Chip, FpgaTime, SpikeLabel, TimedSpikeToChip};

use crate::connection_type::ConnectionType;
use crate::error::DataError;
use crate::execution_instance::ExecutionInstanceId;
use crate::graph::VertexId;
use crate::health_info::ExecutionHealthInfo;
use crate::hooks::PpuSymbolValue;
use crate::port::Port;
use crate::time_info::ExecutionTimeInfo;

/// Value stamped with an FPGA time relative to the realtime interval begin.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedData<T> {
    /// Time stamp.
    pub time: FpgaTime,
    /// Value.
    pub data: T,
}

impl<T> TimedData<T> {
    /// Creates a stamped value.
    pub const fn new(time: FpgaTime, data: T) -> Self {
        Self { time, data }
    }
}

/// Time-ordered samples of one batch entry.
pub type TimedDataSequence<T> = Vec<TimedData<T>>;

/// Spike recorded during a realtime interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimedSpikeFromChip {
    /// Time relative to the interval begin.
    pub time: FpgaTime,
    /// Label.
    pub label: SpikeLabel,
}

/// MADC sample recorded during a realtime interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedMadcSampleFromChip {
    /// Time relative to the interval begin.
    pub time: FpgaTime,
    /// 10-bit value.
    pub value: u16,
    /// Channel sampled.
    pub channel: MadcChannel,
}

/// Batched value of one vertex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataEntry {
    /// Unsigned 32-bit vectors.
    UInt32(Vec<TimedDataSequence<Vec<u32>>>),
    /// 5-bit vectors.
    UInt5(Vec<TimedDataSequence<Vec<u8>>>),
    /// Signed 8-bit vectors.
    Int8(Vec<TimedDataSequence<Vec<i8>>>),
    /// Spikes to inject.
    SpikesToChip(Vec<Vec<TimedSpikeToChip>>),
    /// Recorded spikes.
    SpikesFromChip(Vec<Vec<TimedSpikeFromChip>>),
    /// Recorded MADC samples.
    MadcSamples(Vec<Vec<TimedMadcSampleFromChip>>),
}

fn first_len<T>(batches: &[TimedDataSequence<Vec<T>>]) -> Option<usize> {
    batches
        .iter()
        .find_map(|b| b.first())
        .map(|sample| sample.data.len())
}

impl DataEntry {
    /// Number of batch entries.
    pub fn batch_size(&self) -> usize {
        match self {
            DataEntry::UInt32(b) => b.len(),
            DataEntry::UInt5(b) => b.len(),
            DataEntry::Int8(b) => b.len(),
            DataEntry::SpikesToChip(b) => b.len(),
            DataEntry::SpikesFromChip(b) => b.len(),
            DataEntry::MadcSamples(b) => b.len(),
        }
    }

    /// Host-data connection type of the entry.
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            DataEntry::UInt32(_) => ConnectionType::DataUInt32,
            DataEntry::UInt5(_) => ConnectionType::DataUInt5,
            DataEntry::Int8(_) => ConnectionType::DataInt8,
            DataEntry::SpikesToChip(_) => ConnectionType::DataTimedSpikeToChipSequence,
            DataEntry::SpikesFromChip(_) => ConnectionType::DataTimedSpikeFromChipSequence,
            DataEntry::MadcSamples(_) => ConnectionType::DataTimedMADCSampleFromChipSequence,
        }
    }

    /// Whether the entry can be supplied for `port`.
    ///
    /// The type must match (value types are compared by their host-data form)
    /// and vector entries must have `port.size` elements per sample. Entries
    /// without any sample only check the type.
    pub fn is_match(&self, port: &Port) -> bool {
        let expected = port.connection_type.to_data().unwrap_or(port.connection_type);
        if self.connection_type() != expected {
            return false;
        }
        let len = match self {
            DataEntry::UInt32(b) => first_len(b),
            DataEntry::UInt5(b) => first_len(b),
            DataEntry::Int8(b) => first_len(b),
            DataEntry::SpikesToChip(_)
            | DataEntry::SpikesFromChip(_)
            | DataEntry::MadcSamples(_) => return port.size == 1,
        };
        len.is_none_or(|len| len == port.size)
    }
}

/// Data of one realtime column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataSnippet {
    /// Values per vertex.
    pub data: BTreeMap<VertexId, DataEntry>,
    /// Logical runtime per batch entry and execution instance.
    pub runtime: Vec<BTreeMap<ExecutionInstanceId, FpgaTime>>,
}

impl DataSnippet {
    /// Moves entries of `other` into `self`; keys already present are kept.
    ///
    /// Runtimes are adopted when `self` has none and merged per batch entry
    /// otherwise, which requires equal batch sizes.
    pub fn merge(&mut self, other: DataSnippet) -> Result<(), DataError> {
        for (vertex, entry) in other.data {
            self.data.entry(vertex).or_insert(entry);
        }
        if self.runtime.is_empty() {
            self.runtime = other.runtime;
        } else if !other.runtime.is_empty() {
            if self.runtime.len() != other.runtime.len() {
                return Err(DataError::SizeMismatch {
                    what: "runtime batch size",
                    left: self.runtime.len(),
                    right: other.runtime.len(),
                });
            }
            for (mine, theirs) in self.runtime.iter_mut().zip(other.runtime) {
                for (ei, time) in theirs {
                    mine.entry(ei).or_insert(time);
                }
            }
        }
        Ok(())
    }

    /// Removes all content.
    pub fn clear(&mut self) {
        self.data.clear();
        self.runtime.clear();
    }

    /// Whether neither data nor runtimes are present.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.runtime.is_empty()
    }

    /// Whether all entries and the runtimes agree on one batch size.
    pub fn valid(&self) -> bool {
        let mut sizes = self
            .data
            .values()
            .map(DataEntry::batch_size)
            .chain((!self.runtime.is_empty()).then_some(self.runtime.len()));
        match sizes.next() {
            Some(first) => sizes.all(|s| s == first),
            None => true,
        }
    }

    /// Common batch size; zero when empty.
    pub fn batch_size(&self) -> Result<usize, DataError> {
        if !self.valid() {
            return Err(DataError::Invalid);
        }
        Ok(self
            .data
            .values()
            .next()
            .map(DataEntry::batch_size)
            .unwrap_or(self.runtime.len()))
    }
}

fn merge_snippets(mine: &mut Vec<DataSnippet>, theirs: Vec<DataSnippet>) -> Result<(), DataError> {
    if mine.is_empty() {
        *mine = theirs;
        return Ok(());
    }
    if theirs.is_empty() {
        return Ok(());
    }
    if mine.len() != theirs.len() {
        return Err(DataError::SizeMismatch {
            what: "number of realtime columns",
            left: mine.len(),
            right: theirs.len(),
        });
    }
    for (m, t) in mine.iter_mut().zip(theirs) {
        m.merge(t)?;
    }
    Ok(())
}

fn common_batch_size(snippets: &[DataSnippet]) -> Result<usize, DataError> {
    let mut sizes = snippets.iter().map(DataSnippet::batch_size);
    let Some(first) = sizes.next().transpose()? else {
        return Ok(0);
    };
    for size in sizes {
        if size? != first {
            return Err(DataError::Invalid);
        }
    }
    Ok(first)
}

/// Inputs of an execution: one snippet per realtime column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputData {
    /// Per-column data and runtimes.
    pub snippets: Vec<DataSnippet>,
    /// Wait between the begin of consecutive batch entries per execution instance.
    pub inter_batch_entry_wait: BTreeMap<ExecutionInstanceId, FpgaTime>,
}

impl InputData {
    /// Single-column input.
    pub fn from_snippet(snippet: DataSnippet) -> Self {
        Self {
            snippets: vec![snippet],
            inter_batch_entry_wait: BTreeMap::new(),
        }
    }

    /// Merges `other` column by column; existing keys are kept.
    pub fn merge(&mut self, other: InputData) -> Result<(), DataError> {
        merge_snippets(&mut self.snippets, other.snippets)?;
        for (ei, wait) in other.inter_batch_entry_wait {
            self.inter_batch_entry_wait.entry(ei).or_insert(wait);
        }
        Ok(())
    }

    /// Removes all content.
    pub fn clear(&mut self) {
        self.snippets.clear();
        self.inter_batch_entry_wait.clear();
    }

    /// Whether all snippets are empty.
    pub fn is_empty(&self) -> bool {
        self.snippets.iter().all(DataSnippet::is_empty)
    }

    /// Whether all snippets are valid and agree on the batch size.
    pub fn valid(&self) -> bool {
        common_batch_size(&self.snippets).is_ok()
    }

    /// Common batch size.
    pub fn batch_size(&self) -> Result<usize, DataError> {
        common_batch_size(&self.snippets)
    }
}

/// Symbol values read after each batch entry.
pub type PpuSymbolReadout = BTreeMap<ExecutionInstanceId, BTreeMap<String, PpuSymbolValue>>;

/// Results of an execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputData {
    /// Per-column results.
    pub snippets: Vec<DataSnippet>,
    /// Chip configuration used per execution instance, first column.
    pub pre_execution_chips: BTreeMap<ExecutionInstanceId, Chip>,
    /// Wall-clock timing.
    pub time_info: ExecutionTimeInfo,
    /// Health counters, when read.
    pub health_info: Option<ExecutionHealthInfo>,
    /// PPU symbol values per batch entry.
    pub read_ppu_symbols: Vec<PpuSymbolReadout>,
}

impl OutputData {
    /// Merges `other` into `self`.
    ///
    /// Snippets merge column by column, time info sums, health info merges,
    /// symbol readouts merge per batch entry.
    pub fn merge(&mut self, other: OutputData) -> Result<(), DataError> {
        merge_snippets(&mut self.snippets, other.snippets)?;
        for (ei, chip) in other.pre_execution_chips {
            self.pre_execution_chips.entry(ei).or_insert(chip);
        }
        self.time_info.merge(other.time_info);
        match (&mut self.health_info, other.health_info) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (mine @ None, theirs) => *mine = theirs,
            (Some(_), None) => {}
        }
        if self.read_ppu_symbols.is_empty() {
            self.read_ppu_symbols = other.read_ppu_symbols;
        } else if !other.read_ppu_symbols.is_empty() {
            if self.read_ppu_symbols.len() != other.read_ppu_symbols.len() {
                return Err(DataError::SizeMismatch {
                    what: "symbol readout batch size",
                    left: self.read_ppu_symbols.len(),
                    right: other.read_ppu_symbols.len(),
                });
            }
            for (mine, theirs) in self.read_ppu_symbols.iter_mut().zip(other.read_ppu_symbols) {
                for (ei, symbols) in theirs {
                    mine.entry(ei).or_default().extend(symbols);
                }
            }
        }
        Ok(())
    }

    /// Removes all content.
    pub fn clear(&mut self) {
        *self = OutputData::default();
    }

    /// Whether no results are present.
    pub fn is_empty(&self) -> bool {
        self.snippets.iter().all(DataSnippet::is_empty)
            && self.pre_execution_chips.is_empty()
            && self.read_ppu_symbols.is_empty()
    }

    /// Whether all snippets are valid and agree on the batch size.
    pub fn valid(&self) -> bool {
        common_batch_size(&self.snippets).is_ok()
    }

    /// Common batch size.
    pub fn batch_size(&self) -> Result<usize, DataError> {
        common_batch_size(&self.snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int8(batches: usize, len: usize) -> DataEntry {
        DataEntry::Int8(vec![vec![TimedData::new(FpgaTime::ZERO, vec![0; len])]; batches])
    }

    #[test]
    fn is_match_checks_type_and_size() {
        let entry = int8(2, 3);
        assert!(entry.is_match(&Port::new(3, ConnectionType::DataInt8)));
        assert!(entry.is_match(&Port::new(3, ConnectionType::Int8)));
        assert!(!entry.is_match(&Port::new(4, ConnectionType::DataInt8)));
        assert!(!entry.is_match(&Port::new(3, ConnectionType::DataUInt5)));

        let spikes = DataEntry::SpikesToChip(vec![vec![]]);
        assert!(spikes.is_match(&Port::new(1, ConnectionType::DataTimedSpikeToChipSequence)));
        assert!(!spikes.is_match(&Port::new(2, ConnectionType::DataTimedSpikeToChipSequence)));
    }

    #[test]
    fn snippet_validity() {
        let mut snippet = DataSnippet::default();
        assert!(snippet.valid());
        assert_eq!(snippet.batch_size().unwrap(), 0);

        snippet.data.insert(VertexId(0), int8(2, 1));
        snippet.runtime = vec![BTreeMap::new(); 2];
        assert_eq!(snippet.batch_size().unwrap(), 2);

        snippet.data.insert(VertexId(1), int8(3, 1));
        assert!(!snippet.valid());
        assert!(matches!(snippet.batch_size(), Err(DataError::Invalid)));
    }

    #[test]
    fn merge_keeps_existing_keys_and_merges_runtimes() {
        let ei = ExecutionInstanceId::step(0);
        let other_ei = ExecutionInstanceId::step(1);
        let mut a = DataSnippet::default();
        a.data.insert(VertexId(0), int8(1, 1));
        a.runtime = vec![BTreeMap::from([(ei, FpgaTime(10))])];

        let mut b = DataSnippet::default();
        b.data.insert(VertexId(0), int8(1, 2));
        b.data.insert(VertexId(1), int8(1, 2));
        b.runtime = vec![BTreeMap::from([(ei, FpgaTime(20)), (other_ei, FpgaTime(30))])];

        a.merge(b).unwrap();
        assert_eq!(a.data[&VertexId(0)], int8(1, 1));
        assert_eq!(a.data.len(), 2);
        assert_eq!(a.runtime[0][&ei], FpgaTime(10));
        assert_eq!(a.runtime[0][&other_ei], FpgaTime(30));

        let mut c = DataSnippet {
            runtime: vec![BTreeMap::new(); 2],
            ..Default::default()
        };
        assert!(a.merge(std::mem::take(&mut c)).is_err());
    }

    #[test]
    fn input_data_batch_size_spans_columns() {
        let first = DataSnippet {
            runtime: vec![BTreeMap::new(); 2],
            ..Default::default()
        };
        let mut second = first.clone();
        let mut input = InputData {
            snippets: vec![first, second.clone()],
            ..Default::default()
        };
        assert_eq!(input.batch_size().unwrap(), 2);

        second.runtime.push(BTreeMap::new());
        input.snippets[1] = second;
        assert!(!input.valid());
        input.clear();
        assert!(input.is_empty());
    }
}
