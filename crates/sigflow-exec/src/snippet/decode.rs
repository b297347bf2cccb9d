//! Decoding of recorded hardware data into per-batch-entry sequences.

use tracing::warn;

use sigflow_core::{DataEntry, PortRestriction, TimedData};
use sigflow_hw::event::ChipTimed;
use sigflow_hw::ppu::{self, periodic};
use sigflow_hw::FpgaTime;

/// Realtime interval of one batch entry in absolute FPGA time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    /// Time of the begin marker.
    pub begin: FpgaTime,
    /// Time of the end marker.
    pub end: FpgaTime,
    /// Logical runtime requested by the caller.
    pub runtime: Option<FpgaTime>,
}

impl Interval {
    /// Time relative to the interval begin if `time` falls inside the
    /// interval and, when given, before the logical runtime.
    pub fn relative(&self, time: FpgaTime) -> Option<FpgaTime> {
        if time < self.begin || time >= self.end {
            return None;
        }
        let relative = time.saturating_sub(self.begin);
        match self.runtime {
            Some(runtime) if relative >= runtime => None,
            _ => Some(relative),
        }
    }
}

/// Events of `sorted` inside `interval`, paired with their relative time.
///
/// `sorted` must be ordered by chip time.
pub fn events_in<'a, E: ChipTimed>(
    sorted: &'a [E],
    interval: &Interval,
) -> impl Iterator<Item = (FpgaTime, &'a E)> + 'a {
    let first = sorted.partition_point(|e| e.chip_time().value() < interval.begin.value());
    let last = sorted.partition_point(|e| e.chip_time().value() < interval.end.value());
    let interval = *interval;
    sorted[first..last.max(first)]
        .iter()
        .filter_map(move |e| interval.relative(FpgaTime(e.chip_time().value())).map(|t| (t, e)))
}

/// One periodic CADC sample in absolute FPGA time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodicSample {
    /// Absolute sample time.
    pub time: FpgaTime,
    /// CADC value per neuron column.
    pub values: Vec<i8>,
}

/// Decodes a periodic CADC buffer.
///
/// `start` is the time the sampling was started; PPU timestamps count from
/// there, shifted by the clock-domain crossing wait.
pub fn periodic_samples(
    buffer: &[u8],
    start: FpgaTime,
    fpga_wait_clock_cycles: u32,
    capacity: usize,
) -> Vec<PeriodicSample> {
    let Some(count) = buffer.get(..4) else {
        return Vec::new();
    };
    let count = u32::from_be_bytes([count[0], count[1], count[2], count[3]]) as usize;
    if count > capacity {
        warn!(
            taken = count,
            capacity, "periodic CADC buffer overflowed, later samples are lost"
        );
    }
    (0..count.min(capacity))
        .filter_map(|i| {
            let at = periodic::sample_offset(i);
            let stamp = buffer.get(at..at + 8)?;
            let stamp = u64::from_be_bytes(stamp.try_into().ok()?);
            let row = buffer.get(at + periodic::ROW_OFFSET..at + periodic::SAMPLE_BYTES)?;
            let time = FpgaTime(start.value() + stamp / 2)
                .saturating_sub(FpgaTime(u64::from(fpga_wait_clock_cycles)));
            Some(PeriodicSample {
                time,
                values: ppu::from_vector_unit_row(row),
            })
        })
        .collect()
}

/// Big-endian 64-bit PPU timestamp at the start of a timed record.
pub fn record_time(record: &[u8]) -> Option<FpgaTime> {
    let stamp = u64::from_be_bytes(record.get(..8)?.try_into().ok()?);
    Some(FpgaTime::from_ppu_cycles(stamp))
}

fn slice<T: Clone>(
    batches: &[Vec<TimedData<Vec<T>>>],
    restriction: &PortRestriction,
) -> Vec<Vec<TimedData<Vec<T>>>> {
    batches
        .iter()
        .map(|samples| {
            samples
                .iter()
                .map(|s| {
                    let end = (restriction.max + 1).min(s.data.len());
                    let begin = restriction.min.min(end);
                    TimedData::new(s.time, s.data[begin..end].to_vec())
                })
                .collect()
        })
        .collect()
}

/// Applies an edge's port restriction to vector-valued data.
///
/// Event sequences have size-one ports and pass unchanged.
pub fn restrict(entry: &DataEntry, restriction: Option<&PortRestriction>) -> DataEntry {
    let Some(restriction) = restriction else {
        return entry.clone();
    };
    match entry {
        DataEntry::UInt32(b) => DataEntry::UInt32(slice(b, restriction)),
        DataEntry::UInt5(b) => DataEntry::UInt5(slice(b, restriction)),
        DataEntry::Int8(b) => DataEntry::Int8(slice(b, restriction)),
        other => other.clone(),
    }
}
