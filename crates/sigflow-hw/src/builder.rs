//! Instruction-stream builders.
//!
//! A [`PlaybackProgramBuilder`] collects instructions in execution order.
//! Reads return a [`Ticket`], a handle that becomes valid once the finished
//! [`PlaybackProgram`] was executed by a backend. Tickets share their result
//! slot with the instruction, so they stay valid across builder merges and
//! program splitting.
//!
//! [`AbsoluteTimePlaybackProgramBuilder`] collects commands tagged with an
//! absolute time relative to the last timer reset. Converting it into a
//! sequential builder sorts the commands stably by time and inserts one
//! wait per distinct time:
//!
//! ```text
//!  (t=5, write A) (t=0, spike) (t=5, read B)
//!        │ done()
//!        ▼
//!  wait_until(0) spike  wait_until(5) write A  read B
//! ```

use std::sync::{Arc, OnceLock};

use crate::address::{Address, Word};
use crate::error::{HardwareError, Result};
use crate::event::{MadcSampleFromChip, SpikeFromChip, SpikeLabel};
use crate::time::FpgaTime;

/// Bytes an instruction occupies in FPGA playback memory.
const INSTRUCTION_BYTES: usize = 8;

/// Result of an executed read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadResult {
    /// Words read, in address order.
    pub words: Vec<Word>,
    /// FPGA time at which the read was executed.
    pub fpga_time: FpgaTime,
}

/// Handle to the result of a read instruction.
#[derive(Clone, Debug)]
pub struct Ticket {
    address: Address,
    count: usize,
    slot: Arc<OnceLock<ReadResult>>,
}

impl Ticket {
    fn new(address: Address, count: usize) -> Self {
        Self {
            address,
            count,
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// First address read.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Number of words read.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the program carrying this ticket was executed.
    pub fn is_valid(&self) -> bool {
        self.slot.get().is_some()
    }

    fn result(&self) -> Result<&ReadResult> {
        self.slot
            .get()
            .ok_or(HardwareError::TicketNotValid(self.count, self.address))
    }

    /// Words read.
    pub fn get(&self) -> Result<&[Word]> {
        Ok(&self.result()?.words)
    }

    /// FPGA time of the read.
    pub fn fpga_time(&self) -> Result<FpgaTime> {
        Ok(self.result()?.fpga_time)
    }

    /// Words read, flattened into big-endian bytes.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .result()?
            .words
            .iter()
            .flat_map(|w| w.0.to_be_bytes())
            .collect())
    }

    /// Stores the read result. Returns `false` if a result was already set.
    pub fn fulfil(&self, result: ReadResult) -> bool {
        self.slot.set(result).is_ok()
    }
}

/// Single playback instruction.
#[derive(Clone, Debug)]
pub enum Instruction {
    /// Reset the FPGA timer to zero.
    TimerReset,
    /// Block until the timer reaches the given value.
    WaitUntil(FpgaTime),
    /// Write one word.
    Write {
        /// Target address.
        address: Address,
        /// Value written.
        word: Word,
    },
    /// Read consecutive words into a ticket.
    Read {
        /// Ticket receiving the result.
        ticket: Ticket,
    },
    /// Send a spike to the chip.
    Spike(SpikeLabel),
    /// Block until `read(address) & mask == expected` or the instruction timeout expires.
    PollUntil {
        /// Address polled.
        address: Address,
        /// Bits compared.
        mask: u32,
        /// Expected value of the compared bits.
        expected: u32,
    },
    /// Block until all previous instructions completed.
    Barrier,
}

impl Instruction {
    fn size_to_fpga(&self) -> usize {
        match self {
            Instruction::Read { ticket } => INSTRUCTION_BYTES * ticket.count.max(1),
            _ => INSTRUCTION_BYTES,
        }
    }
}

/// Sequential instruction builder.
#[derive(Clone, Debug, Default)]
pub struct PlaybackProgramBuilder {
    instructions: Vec<Instruction>,
}

impl PlaybackProgramBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write.
    pub fn write(&mut self, address: Address, word: Word) {
        self.instructions.push(Instruction::Write { address, word });
    }

    /// Appends writes of arbitrary address/word pairs.
    pub fn write_all(&mut self, words: impl IntoIterator<Item = (Address, Word)>) {
        self.instructions
            .extend(words.into_iter().map(|(address, word)| Instruction::Write { address, word }));
    }

    /// Appends a read of `count` consecutive words.
    pub fn read(&mut self, address: Address, count: usize) -> Ticket {
        let ticket = Ticket::new(address, count);
        self.instructions.push(Instruction::Read {
            ticket: ticket.clone(),
        });
        ticket
    }

    /// Appends a wait until the timer reaches `time`.
    pub fn wait_until(&mut self, time: FpgaTime) {
        self.instructions.push(Instruction::WaitUntil(time));
    }

    /// Appends a timer reset.
    pub fn timer_reset(&mut self) {
        self.instructions.push(Instruction::TimerReset);
    }

    /// Appends a spike.
    pub fn spike(&mut self, label: SpikeLabel) {
        self.instructions.push(Instruction::Spike(label));
    }

    /// Appends a poll on `address`.
    pub fn poll_until(&mut self, address: Address, mask: u32, expected: u32) {
        self.instructions.push(Instruction::PollUntil {
            address,
            mask,
            expected,
        });
    }

    /// Appends a barrier.
    pub fn barrier(&mut self) {
        self.instructions.push(Instruction::Barrier);
    }

    /// Appends an already built instruction. Reads keep their ticket.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Splits into consecutive builders of at most `capacity` bytes each,
    /// leaving `self` empty.
    ///
    /// An instruction larger than `capacity` ends up alone in its builder.
    pub fn split(&mut self, capacity: usize) -> Vec<PlaybackProgramBuilder> {
        let mut parts = Vec::new();
        let mut current = PlaybackProgramBuilder::new();
        let mut size = 0;
        for instruction in std::mem::take(&mut self.instructions) {
            let bytes = instruction.size_to_fpga();
            if !current.is_empty() && size + bytes > capacity {
                parts.push(std::mem::take(&mut current));
                size = 0;
            }
            size += bytes;
            current.instructions.push(instruction);
        }
        if !current.is_empty() {
            parts.push(current);
        }
        parts
    }

    /// Moves all instructions of `other` to the end of `self`.
    pub fn merge_back(&mut self, other: &mut PlaybackProgramBuilder) {
        self.instructions.append(&mut other.instructions);
    }

    /// Moves all instructions of `other` to the front of `self`.
    pub fn merge_front(&mut self, other: &mut PlaybackProgramBuilder) {
        let mut front = std::mem::take(&mut other.instructions);
        front.append(&mut self.instructions);
        self.instructions = front;
    }

    /// Copies all instructions of `other` to the end of `self`.
    ///
    /// Reads in `other` share their tickets with the copies.
    pub fn copy_back(&mut self, other: &PlaybackProgramBuilder) {
        self.instructions.extend(other.instructions.iter().cloned());
    }

    /// Whether no instruction was added.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Bytes the instructions occupy in FPGA playback memory.
    pub fn size_to_fpga(&self) -> usize {
        self.instructions.iter().map(Instruction::size_to_fpga).sum()
    }

    /// Instructions added so far.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Finishes the builder into a program, leaving the builder empty.
    pub fn done(&mut self) -> PlaybackProgram {
        PlaybackProgram {
            instructions: std::mem::take(&mut self.instructions),
            spikes: Vec::new(),
            madc_samples: Vec::new(),
        }
    }
}

/// Builder of commands at absolute times relative to a timer reset.
#[derive(Clone, Debug, Default)]
pub struct AbsoluteTimePlaybackProgramBuilder {
    commands: Vec<(FpgaTime, Instruction)>,
}

impl AbsoluteTimePlaybackProgramBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a write at `time`.
    pub fn write(&mut self, time: FpgaTime, address: Address, word: Word) {
        self.commands
            .push((time, Instruction::Write { address, word }));
    }

    /// Adds a read of `count` words at `time`.
    pub fn read(&mut self, time: FpgaTime, address: Address, count: usize) -> Ticket {
        let ticket = Ticket::new(address, count);
        self.commands.push((
            time,
            Instruction::Read {
                ticket: ticket.clone(),
            },
        ));
        ticket
    }

    /// Adds a spike at `time`.
    pub fn spike(&mut self, time: FpgaTime, label: SpikeLabel) {
        self.commands.push((time, Instruction::Spike(label)));
    }

    /// Moves all commands of `other` into `self`.
    pub fn merge(&mut self, other: &mut AbsoluteTimePlaybackProgramBuilder) {
        self.commands.append(&mut other.commands);
    }

    /// Copies all commands of `other` into `self`.
    pub fn copy(&mut self, other: &AbsoluteTimePlaybackProgramBuilder) {
        self.commands.extend(other.commands.iter().cloned());
    }

    /// Shifts every command by `offset`.
    pub fn shift_time(&mut self, offset: FpgaTime) {
        for (time, _) in &mut self.commands {
            *time += offset;
        }
    }

    /// Whether no command was added.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Latest command time, zero when empty.
    pub fn end_time(&self) -> FpgaTime {
        self.commands
            .iter()
            .map(|(t, _)| *t)
            .max()
            .unwrap_or(FpgaTime::ZERO)
    }

    /// Converts into a sequential builder, leaving `self` empty.
    pub fn done(&mut self) -> PlaybackProgramBuilder {
        let mut commands = std::mem::take(&mut self.commands);
        commands.sort_by_key(|(t, _)| *t);
        let mut builder = PlaybackProgramBuilder::new();
        let mut current = None;
        for (time, instruction) in commands {
            if current != Some(time) {
                builder.wait_until(time);
                current = Some(time);
            }
            builder.instructions.push(instruction);
        }
        builder
    }
}

/// Finished instruction stream plus the events received while executing it.
#[derive(Debug, Default)]
pub struct PlaybackProgram {
    instructions: Vec<Instruction>,
    spikes: Vec<SpikeFromChip>,
    madc_samples: Vec<MadcSampleFromChip>,
}

impl PlaybackProgram {
    /// Instructions in execution order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Bytes the program occupies in FPGA playback memory.
    pub fn size_to_fpga(&self) -> usize {
        self.instructions.iter().map(Instruction::size_to_fpga).sum()
    }

    /// Spikes received during execution.
    pub fn spikes(&self) -> &[SpikeFromChip] {
        &self.spikes
    }

    /// MADC samples received during execution.
    pub fn madc_samples(&self) -> &[MadcSampleFromChip] {
        &self.madc_samples
    }

    /// Stores the events received by the backend.
    pub fn set_received(&mut self, spikes: Vec<SpikeFromChip>, madc_samples: Vec<MadcSampleFromChip>) {
        self.spikes = spikes;
        self.madc_samples = madc_samples;
    }

    /// Whether every read of the program holds a result.
    pub fn is_executed(&self) -> bool {
        self.instructions.iter().all(|i| match i {
            Instruction::Read { ticket } => ticket.is_valid(),
            _ => true,
        })
    }
}
