//! Backend boundary: the [`Connection`] trait and its reinit stack.
//!
//! A connection executes finished playback programs on one or more chips
//! and reports how long the hardware was busy. Connections backed by a
//! shared, time-multiplexed service may run other users' programs between
//! two of ours; they restore our chip state from the [`ReinitStack`] before
//! continuing.
//!
//! # Reinit stack
//!
//! ```text
//!  slot                        request            snapshot      enforce
//!  BaseConfig                  unchanged words    -             on fresh / full writes
//!  DifferentialConfig          changed words      -             when non-empty
//!  ScheduleOutReplacement      -                  PPU stop+read never
//!  CapmemSettlingWait          wait               -             after CapMem changes
//!  PpuStart                    PPU start          -             when PPUs are used
//! ```
//!
//! Enforced entries run once, right before the next program. After a
//! schedule-out, every slot is replayed in order; a snapshot entry replays
//! the words its reads returned when the session was scheduled out.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sigflow_hw::{Address, ChipOnConnection, PlaybackProgram, PlaybackProgramBuilder, Word};

use crate::error::Result;

/// Time spent by a connection, accumulated over its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTimeInfo {
    /// Encoding programs into transport frames.
    pub encode_duration: Duration,
    /// Decoding responses.
    pub decode_duration: Duration,
    /// Transferring programs to the FPGA.
    pub commit_duration: Duration,
    /// Hardware busy executing programs.
    pub execution_duration: Duration,
}

impl AddAssign for ConnectionTimeInfo {
    fn add_assign(&mut self, rhs: Self) {
        self.encode_duration += rhs.encode_duration;
        self.decode_duration += rhs.decode_duration;
        self.commit_duration += rhs.commit_duration;
        self.execution_duration += rhs.execution_duration;
    }
}

/// Slots of the reinit stack, in replay order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReinitSlot {
    /// Configuration words unchanged since the previous run.
    BaseConfig,
    /// Configuration words changed since the previous run.
    DifferentialConfig,
    /// State read back when another session takes over.
    ScheduleOutReplacement,
    /// Wait for analog biases to settle.
    CapmemSettlingWait,
    /// Start of the on-chip processors.
    PpuStart,
}

impl ReinitSlot {
    /// All slots in replay order.
    pub const ALL: [ReinitSlot; 5] = [
        ReinitSlot::BaseConfig,
        ReinitSlot::DifferentialConfig,
        ReinitSlot::ScheduleOutReplacement,
        ReinitSlot::CapmemSettlingWait,
        ReinitSlot::PpuStart,
    ];
}

/// One entry of the reinit stack.
#[derive(Clone, Debug, Default)]
pub struct ReinitEntry {
    /// Program replayed on reinit.
    pub request: PlaybackProgramBuilder,
    /// Program run when the session is scheduled out; its reads are
    /// replayed as writes on reinit.
    pub snapshot: Option<PlaybackProgramBuilder>,
    /// Run `request` before the next program even without a schedule-out.
    pub enforce: bool,
    /// Words captured by the last snapshot.
    pub captured: Vec<(Address, Word)>,
}

impl ReinitEntry {
    /// Entry replaying `request`.
    pub fn new(request: PlaybackProgramBuilder, enforce: bool) -> Self {
        Self {
            request,
            snapshot: None,
            enforce,
            captured: Vec::new(),
        }
    }

    /// Entry capturing state with `snapshot` on schedule-out.
    pub fn snapshot(snapshot: PlaybackProgramBuilder) -> Self {
        Self {
            request: PlaybackProgramBuilder::new(),
            snapshot: (!snapshot.is_empty()).then_some(snapshot),
            enforce: false,
            captured: Vec::new(),
        }
    }

    /// Whether the entry does nothing on replay.
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.captured.is_empty()
    }
}

/// Reinit entries per chip and slot.
#[derive(Clone, Debug, Default)]
pub struct ReinitStack {
    entries: BTreeMap<(ChipOnConnection, ReinitSlot), ReinitEntry>,
}

impl ReinitStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entry of `slot` on `chip`.
    pub fn set(&mut self, chip: ChipOnConnection, slot: ReinitSlot, entry: ReinitEntry) {
        self.entries.insert((chip, slot), entry);
    }

    /// Entry of `slot` on `chip`.
    pub fn get(&self, chip: ChipOnConnection, slot: ReinitSlot) -> Option<&ReinitEntry> {
        self.entries.get(&(chip, slot))
    }

    /// Entries of `chip` in replay order.
    pub fn entries(&self, chip: ChipOnConnection) -> impl Iterator<Item = (ReinitSlot, &ReinitEntry)> {
        self.entries
            .range((chip, ReinitSlot::BaseConfig)..=(chip, ReinitSlot::PpuStart))
            .map(|((_, slot), entry)| (*slot, entry))
    }

    /// Mutable entries of `chip` in replay order.
    pub fn entries_mut(
        &mut self,
        chip: ChipOnConnection,
    ) -> impl Iterator<Item = (ReinitSlot, &mut ReinitEntry)> {
        self.entries
            .range_mut((chip, ReinitSlot::BaseConfig)..=(chip, ReinitSlot::PpuStart))
            .map(|((_, slot), entry)| (*slot, entry))
    }

    /// Chips with at least one entry.
    pub fn chips(&self) -> Vec<ChipOnConnection> {
        let mut chips: Vec<_> = self.entries.keys().map(|(chip, _)| *chip).collect();
        chips.dedup();
        chips
    }

    /// Takes the requests of enforced entries of `chip`, clearing their flag.
    pub fn take_enforced(&mut self, chip: ChipOnConnection) -> Vec<PlaybackProgramBuilder> {
        self.entries_mut(chip)
            .filter(|(_, e)| e.enforce)
            .map(|(_, e)| {
                e.enforce = false;
                e.request.clone()
            })
            .filter(|b| !b.is_empty())
            .collect()
    }

    /// Clears every pending enforce flag of `chip`.
    pub fn clear_enforced(&mut self, chip: ChipOnConnection) {
        for (_, entry) in self.entries_mut(chip) {
            entry.enforce = false;
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Link to one or more chips.
///
/// Implementations execute programs strictly in submission order. They are
/// not required to be internally synchronized; [`StatefulConnection`]
/// serializes access.
///
/// [`StatefulConnection`]: crate::StatefulConnection
pub trait Connection: Send {
    /// Executes `program` on `chip`, storing read results in its tickets and
    /// received events in the program. Returns the hardware execution time.
    ///
    /// Pending enforced reinit entries of `chip` run first.
    fn run(&mut self, chip: ChipOnConnection, program: &mut PlaybackProgram) -> Result<Duration>;

    /// Accumulated time information.
    fn time_info(&self) -> ConnectionTimeInfo;

    /// Stable identifier of the hardware setup behind the connection.
    fn unique_identifier(&self) -> String;

    /// Description of the FPGA bitfile.
    fn bitfile_info(&self) -> String;

    /// Version of the remote service, empty for direct connections.
    fn remote_repo_state(&self) -> String;

    /// Whether the connection is a shared, time-multiplexed remote service.
    ///
    /// Other users' programs may run between two of ours, so contiguity of
    /// consecutive programs cannot be assumed.
    fn is_quiggeldy(&self) -> bool;

    /// Chips reachable through this connection.
    fn chips_on_connection(&self) -> Vec<ChipOnConnection>;

    /// Playback memory available per program, in bytes.
    fn playback_memory_size(&self) -> usize;

    /// Reinit stack restored after a schedule-out.
    fn reinit_stack(&mut self) -> &mut ReinitStack;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn run(&mut self, chip: ChipOnConnection, program: &mut PlaybackProgram) -> Result<Duration> {
        (**self).run(chip, program)
    }

    fn time_info(&self) -> ConnectionTimeInfo {
        (**self).time_info()
    }

    fn unique_identifier(&self) -> String {
        (**self).unique_identifier()
    }

    fn bitfile_info(&self) -> String {
        (**self).bitfile_info()
    }

    fn remote_repo_state(&self) -> String {
        (**self).remote_repo_state()
    }

    fn is_quiggeldy(&self) -> bool {
        (**self).is_quiggeldy()
    }

    fn chips_on_connection(&self) -> Vec<ChipOnConnection> {
        (**self).chips_on_connection()
    }

    fn playback_memory_size(&self) -> usize {
        (**self).playback_memory_size()
    }

    fn reinit_stack(&mut self) -> &mut ReinitStack {
        (**self).reinit_stack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow_hw::address::map;

    fn builder_with_write(value: u32) -> PlaybackProgramBuilder {
        let mut builder = PlaybackProgramBuilder::new();
        builder.write(Address(map::EVENT_RECORDING), Word(value));
        builder
    }

    #[test]
    fn entries_are_ordered_per_chip() {
        let mut stack = ReinitStack::new();
        let chip = ChipOnConnection(0);
        stack.set(chip, ReinitSlot::PpuStart, ReinitEntry::new(builder_with_write(1), true));
        stack.set(chip, ReinitSlot::BaseConfig, ReinitEntry::new(builder_with_write(2), false));
        stack.set(
            ChipOnConnection(1),
            ReinitSlot::BaseConfig,
            ReinitEntry::new(builder_with_write(3), true),
        );

        let slots: Vec<_> = stack.entries(chip).map(|(slot, _)| slot).collect();
        assert_eq!(slots, [ReinitSlot::BaseConfig, ReinitSlot::PpuStart]);
        assert_eq!(stack.chips(), [ChipOnConnection(0), ChipOnConnection(1)]);
    }

    #[test]
    fn enforced_requests_are_taken_once() {
        let mut stack = ReinitStack::new();
        let chip = ChipOnConnection(0);
        stack.set(chip, ReinitSlot::BaseConfig, ReinitEntry::new(builder_with_write(1), true));
        stack.set(
            chip,
            ReinitSlot::CapmemSettlingWait,
            ReinitEntry::new(builder_with_write(2), false),
        );
        stack.set(chip, ReinitSlot::PpuStart, ReinitEntry::new(PlaybackProgramBuilder::new(), true));

        assert_eq!(stack.take_enforced(chip).len(), 1);
        assert!(stack.take_enforced(chip).is_empty());
        assert!(!stack.get(chip, ReinitSlot::BaseConfig).unwrap().enforce);
    }

    #[test]
    fn empty_snapshot_is_dropped() {
        let entry = ReinitEntry::snapshot(PlaybackProgramBuilder::new());
        assert!(entry.snapshot.is_none());
        assert!(entry.is_empty());
    }

    #[test]
    fn time_info_accumulates() {
        let mut total = ConnectionTimeInfo::default();
        let step = ConnectionTimeInfo {
            execution_duration: Duration::from_micros(5),
            commit_duration: Duration::from_micros(1),
            ..ConnectionTimeInfo::default()
        };
        total += step;
        total += step;
        assert_eq!(total.execution_duration, Duration::from_micros(10));
        assert_eq!(total.commit_duration, Duration::from_micros(2));
    }
}
