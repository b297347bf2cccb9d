//! Simulated connection to one or more chips.
//!
//! [`SimulatedConnection`] executes playback programs against a
//! deterministic chip model: a register file holding the static
//! configuration, a spiking network with crossbar routing, an MADC, CADC
//! readout, a PPU interpreter for the generated image and the health
//! counters. Time is simulated in FPGA cycles; the connection reports the
//! simulated hardware time as execution duration.
//!
//! # Architecture
//!
//! ```text
//!  SimulatedConnection ── run(chip, program)
//!    │  ├─ injected failure?            ──► Transport error
//!    │  ├─ program too large?           ──► ProgramTooLarge
//!    │  ├─ session interrupted?         ──► schedule out, reset, replay reinit stack
//!    │  ├─ enforced reinit requests
//!    │  └─ program
//!    ▼
//!  SimulatedChip (per chip)
//!    ├─ register file (Chip) + control registers + DRAM
//!    ├─ Network: membranes, crossbar, background sources, MADC
//!    └─ SimulatedPpu × 2
//! ```
//!
//! A [`SimulationHandle`] stays with the test or tool that created the
//! connection after the connection itself moved into a
//! [`StatefulConnection`](crate::StatefulConnection); it injects failures,
//! interrupts the session and exposes a log of executed programs.

mod chip;
mod network;
mod ppu;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use sigflow_hw::{
    Chip, ChipOnConnection, FpgaTime, HardwareParameters, Instruction, PlaybackProgram,
    PlaybackProgramBuilder,
};

use self::chip::SimulatedChip;
use crate::connection::{Connection, ConnectionTimeInfo, ReinitStack};
use crate::error::{BackendError, Result};

/// Settings of a simulated connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Identifier reported by `unique_identifier()`.
    pub identifier: String,
    /// Number of chips behind the connection.
    pub chips_per_connection: usize,
    /// Wall-clock latency added to every program.
    pub round_trip_latency: Duration,
    /// Behave like a shared, time-multiplexed service.
    pub shared_service: bool,
    /// Playback memory size in bytes.
    pub playback_memory_size: usize,
    /// Schedule the session out every n programs; shared service only.
    pub interrupt_every: Option<usize>,
    /// Timing of the simulated hardware.
    pub params: HardwareParameters,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            identifier: "sim-0".into(),
            chips_per_connection: 1,
            round_trip_latency: Duration::ZERO,
            shared_service: false,
            playback_memory_size: 1 << 20,
            interrupt_every: None,
            params: HardwareParameters::default(),
        }
    }
}

/// One program executed by a simulated connection.
#[derive(Clone, Debug)]
pub struct RunRecord {
    /// Chip the program ran on.
    pub chip: ChipOnConnection,
    /// Wall-clock start.
    pub start: Instant,
    /// Wall-clock end.
    pub end: Instant,
    /// Instructions in the program, reinit programs excluded.
    pub instructions: usize,
    /// Whether the session was scheduled out before this program.
    pub rescheduled: bool,
}

#[derive(Debug, Default)]
struct HandleState {
    fail_next: AtomicUsize,
    interrupt: AtomicBool,
    runs: Mutex<Vec<RunRecord>>,
}

/// Control and observation of a simulated connection from outside.
#[derive(Clone, Debug, Default)]
pub struct SimulationHandle {
    state: Arc<HandleState>,
}

impl SimulationHandle {
    /// Makes the next `count` programs fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.state.fail_next.store(count, Ordering::SeqCst);
    }

    /// Lets another user run before the next program, destroying chip state.
    pub fn interrupt_session(&self) {
        self.state.interrupt.store(true, Ordering::SeqCst);
    }

    /// Programs executed so far.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.state.runs.lock().clone()
    }

    /// Forgets the run log.
    pub fn clear_runs(&self) {
        self.state.runs.lock().clear();
    }

    fn take_failure(&self) -> bool {
        self.state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_interrupt(&self) -> bool {
        self.state.interrupt.swap(false, Ordering::SeqCst)
    }

    fn record(&self, record: RunRecord) {
        self.state.runs.lock().push(record);
    }
}

/// Connection to simulated chips.
#[derive(Debug)]
pub struct SimulatedConnection {
    options: SimulationOptions,
    chips: Vec<SimulatedChip>,
    reinit: ReinitStack,
    time_info: ConnectionTimeInfo,
    handle: SimulationHandle,
    runs_since_schedule_out: usize,
}

impl SimulatedConnection {
    /// Creates a connection with chips at rest.
    pub fn new(options: SimulationOptions) -> Self {
        info!(
            identifier = %options.identifier,
            chips = options.chips_per_connection,
            shared_service = options.shared_service,
            "simulated connection opened"
        );
        let chips = (0..options.chips_per_connection)
            .map(|_| SimulatedChip::new(&options.params))
            .collect();
        Self {
            options,
            chips,
            reinit: ReinitStack::new(),
            time_info: ConnectionTimeInfo::default(),
            handle: SimulationHandle::default(),
            runs_since_schedule_out: 0,
        }
    }

    /// Handle for failure injection, interruption and the run log.
    pub fn handle(&self) -> SimulationHandle {
        self.handle.clone()
    }

    /// Options the connection was created with.
    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    /// Current FPGA time of `chip`.
    pub fn systime(&self, chip: ChipOnConnection) -> Option<FpgaTime> {
        self.chip(chip).ok().map(|index| FpgaTime(self.chips[index].systime()))
    }

    fn chip(&self, chip: ChipOnConnection) -> Result<usize> {
        usize::try_from(chip.0)
            .ok()
            .filter(|&index| index < self.chips.len())
            .ok_or(BackendError::UnknownChip {
                chip,
                available: self.chips.len(),
            })
    }

    fn interrupted(&mut self) -> bool {
        if !self.options.shared_service {
            return false;
        }
        self.runs_since_schedule_out += 1;
        let periodic = self
            .options
            .interrupt_every
            .is_some_and(|n| self.runs_since_schedule_out > n);
        if self.handle.take_interrupt() || periodic {
            self.runs_since_schedule_out = 1;
            return true;
        }
        false
    }

    /// Captures snapshots, hands every chip to "another user" and restores
    /// the session from the reinit stack.
    fn schedule_out(&mut self) -> Result<()> {
        for index in 0..self.chips.len() {
            #[allow(clippy::cast_possible_truncation)]
            let chip = ChipOnConnection(index as u32);
            let sim = &mut self.chips[index];
            for (slot, entry) in self.reinit.entries_mut(chip) {
                let Some(snapshot) = &entry.snapshot else {
                    continue;
                };
                entry.captured = capture(sim, snapshot)?;
                trace!(%chip, ?slot, words = entry.captured.len(), "snapshot captured");
            }
            sim.reset();
            for (slot, entry) in self.reinit.entries(chip) {
                let mut replay = PlaybackProgramBuilder::new();
                replay.write_all(entry.captured.iter().copied());
                replay.copy_back(&entry.request);
                trace!(%chip, ?slot, instructions = replay.len(), "reinit replayed");
                sim.execute(replay.done().instructions())?;
            }
            self.reinit.clear_enforced(chip);
        }
        debug!(identifier = %self.options.identifier, "session scheduled out and restored");
        Ok(())
    }
}

/// Runs `snapshot` and returns the words its reads returned.
fn capture(
    sim: &mut SimulatedChip,
    snapshot: &PlaybackProgramBuilder,
) -> Result<Vec<(sigflow_hw::Address, sigflow_hw::Word)>> {
    let mut builder = PlaybackProgramBuilder::new();
    let mut tickets = Vec::new();
    for instruction in snapshot.instructions() {
        match instruction {
            Instruction::Read { ticket } => {
                tickets.push(builder.read(ticket.address(), ticket.count()));
            }
            other => builder.push(other.clone()),
        }
    }
    sim.execute(builder.done().instructions())?;
    let mut words = Vec::new();
    for ticket in &tickets {
        let base = ticket.address();
        words.extend(ticket.get()?.iter().enumerate().map(|(i, &w)| (base.offset(i), w)));
    }
    Ok(words)
}

impl Connection for SimulatedConnection {
    fn run(&mut self, chip: ChipOnConnection, program: &mut PlaybackProgram) -> Result<Duration> {
        let start = Instant::now();
        let index = self.chip(chip)?;
        if self.handle.take_failure() {
            return Err(BackendError::transport(
                self.options.identifier.clone(),
                "injected failure",
            ));
        }
        let size = program.size_to_fpga();
        if size > self.options.playback_memory_size {
            return Err(BackendError::ProgramTooLarge {
                size,
                capacity: self.options.playback_memory_size,
            });
        }

        let rescheduled = self.interrupted();
        if rescheduled {
            self.schedule_out()?;
        }
        let begin = self.chips[index].systime();
        for mut request in self.reinit.take_enforced(chip) {
            self.chips[index].execute(request.done().instructions())?;
        }
        let encoded = start.elapsed();

        let (spikes, madc_samples) = self.chips[index].execute(program.instructions())?;
        if !self.options.round_trip_latency.is_zero() {
            std::thread::sleep(self.options.round_trip_latency);
        }
        let decode_start = Instant::now();
        trace!(%chip, spikes = spikes.len(), madc_samples = madc_samples.len(), "program executed");
        program.set_received(spikes, madc_samples);

        let busy = FpgaTime(self.chips[index].systime() - begin).as_duration();
        self.time_info += ConnectionTimeInfo {
            encode_duration: encoded,
            decode_duration: decode_start.elapsed(),
            commit_duration: self.options.round_trip_latency,
            execution_duration: busy,
        };
        self.handle.record(RunRecord {
            chip,
            start,
            end: Instant::now(),
            instructions: program.instructions().len(),
            rescheduled,
        });
        Ok(busy)
    }

    fn time_info(&self) -> ConnectionTimeInfo {
        self.time_info
    }

    fn unique_identifier(&self) -> String {
        self.options.identifier.clone()
    }

    fn bitfile_info(&self) -> String {
        format!("simulated chip model, {} chips", self.chips.len())
    }

    fn remote_repo_state(&self) -> String {
        String::new()
    }

    fn is_quiggeldy(&self) -> bool {
        self.options.shared_service
    }

    fn chips_on_connection(&self) -> Vec<ChipOnConnection> {
        (0..self.chips.len())
            .filter_map(|i| u32::try_from(i).ok().map(ChipOnConnection))
            .collect()
    }

    fn playback_memory_size(&self) -> usize {
        self.options.playback_memory_size
    }

    fn reinit_stack(&mut self) -> &mut ReinitStack {
        &mut self.reinit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ReinitEntry, ReinitSlot};
    use sigflow_hw::address;
    use sigflow_hw::coord::Hemisphere;
    use sigflow_hw::{Address, Word};

    fn write_program(address: Address, value: u32) -> PlaybackProgram {
        let mut builder = PlaybackProgramBuilder::new();
        builder.write(address, Word(value));
        builder.done()
    }

    #[test]
    fn rejects_unknown_chip_and_large_programs() {
        let mut connection = SimulatedConnection::new(SimulationOptions {
            playback_memory_size: 16,
            ..SimulationOptions::default()
        });
        let mut program = write_program(address::neuron(Hemisphere::Top, 0), 1);
        assert!(matches!(
            connection.run(ChipOnConnection(1), &mut program),
            Err(BackendError::UnknownChip { available: 1, .. })
        ));

        let mut builder = PlaybackProgramBuilder::new();
        builder.read(address::neuron(Hemisphere::Top, 0), 3);
        assert!(matches!(
            connection.run(ChipOnConnection(0), &mut builder.done()),
            Err(BackendError::ProgramTooLarge { size: 24, capacity: 16 })
        ));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut connection = SimulatedConnection::new(SimulationOptions::default());
        let handle = connection.handle();
        handle.fail_next(1);
        let mut program = write_program(address::neuron(Hemisphere::Top, 0), 1);
        assert!(matches!(
            connection.run(ChipOnConnection(0), &mut program),
            Err(BackendError::Transport { .. })
        ));
        assert!(connection.run(ChipOnConnection(0), &mut program).is_ok());
        assert_eq!(handle.runs().len(), 1);
    }

    #[test]
    fn enforced_reinit_runs_once_before_program() {
        let mut connection = SimulatedConnection::new(SimulationOptions::default());
        let chip = ChipOnConnection(0);
        let neuron = address::neuron(Hemisphere::Top, 7);
        let mut request = PlaybackProgramBuilder::new();
        request.write(neuron, Word(1));
        connection
            .reinit_stack()
            .set(chip, ReinitSlot::BaseConfig, ReinitEntry::new(request, true));

        let mut builder = PlaybackProgramBuilder::new();
        let ticket = builder.read(neuron, 1);
        connection.run(chip, &mut builder.done()).unwrap();
        assert_eq!(ticket.get().unwrap(), &[Word(1)]);

        connection.run(chip, &mut write_program(neuron, 0)).unwrap();
        let mut builder = PlaybackProgramBuilder::new();
        let ticket = builder.read(neuron, 1);
        connection.run(chip, &mut builder.done()).unwrap();
        assert_eq!(ticket.get().unwrap(), &[Word(0)]);
    }

    #[test]
    fn interrupted_session_is_restored_from_snapshot() {
        let mut connection = SimulatedConnection::new(SimulationOptions {
            shared_service: true,
            ..SimulationOptions::default()
        });
        let handle = connection.handle();
        let chip = ChipOnConnection(0);
        let base = address::neuron(Hemisphere::Top, 1);
        let altered = address::neuron(Hemisphere::Bottom, 2);

        let mut request = PlaybackProgramBuilder::new();
        request.write(base, Word(1));
        let mut snapshot = PlaybackProgramBuilder::new();
        snapshot.read(altered, 1);
        let stack = connection.reinit_stack();
        stack.set(chip, ReinitSlot::BaseConfig, ReinitEntry::new(request, true));
        stack.set(chip, ReinitSlot::ScheduleOutReplacement, ReinitEntry::snapshot(snapshot));

        connection.run(chip, &mut write_program(altered, 1)).unwrap();
        handle.interrupt_session();
        let mut builder = PlaybackProgramBuilder::new();
        let tickets = [builder.read(base, 1), builder.read(altered, 1)];
        connection.run(chip, &mut builder.done()).unwrap();

        assert_eq!(tickets[0].get().unwrap(), &[Word(1)]);
        assert_eq!(tickets[1].get().unwrap(), &[Word(1)]);
        let runs = handle.runs();
        assert!(!runs[0].rescheduled && runs[1].rescheduled);
    }

    #[test]
    fn execution_duration_is_simulated_time() {
        let mut connection = SimulatedConnection::new(SimulationOptions::default());
        let mut builder = PlaybackProgramBuilder::new();
        builder.timer_reset();
        builder.wait_until(FpgaTime::from_us(20));
        let busy = connection.run(ChipOnConnection(0), &mut builder.done()).unwrap();
        assert_eq!(busy, Duration::from_micros(20));
        assert_eq!(connection.time_info().execution_duration, busy);
    }
}
