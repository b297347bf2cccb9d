//! Instruction generators used around user programs.
//!
//! These produce the fixed sequences a stateful connection wraps around the
//! realtime programs: PPU start and stop, the read-back of state the PPU may
//! alter, and the analog settling wait.

use sigflow_hw::address::{self, map};
use sigflow_hw::chip::PPU_MEMORY_WORDS;
use sigflow_hw::coord::{Hemisphere, SynapseRow};
use sigflow_hw::ppu::{self, PpuCommand, PpuControlRegister, PpuSymbols};
use sigflow_hw::{
    Address, Chip, FpgaTime, HardwareParameters, PlaybackProgramBuilder, Result, Ticket, Word,
};

/// Instruction timeout used while waiting for the PPU to come up.
pub const PPU_START_TIMEOUT: FpgaTime = FpgaTime::from_us(1_000_000);

/// Words per synapse row.
const SYNAPSE_ROW_WORDS: usize = 128;

/// Appends a write of the instruction timeout applied to later polls.
#[allow(clippy::cast_possible_truncation)]
pub fn set_instruction_timeout(builder: &mut PlaybackProgramBuilder, timeout: FpgaTime) {
    builder.write(
        Address(map::INSTRUCTION_TIMEOUT),
        Word(timeout.value().min(u64::from(u32::MAX)) as u32),
    );
}

/// Releases both PPUs from reset and waits until their main loop reports idle.
pub fn ppu_start(symbols: &PpuSymbols, params: &HardwareParameters) -> Result<PlaybackProgramBuilder> {
    let status = ppu::internal_block(symbols, "status")?;
    let mut builder = PlaybackProgramBuilder::new();
    let control = PpuControlRegister { inhibit_reset: true };
    for hemisphere in Hemisphere::iter_all() {
        builder.write(address::ppu_control(hemisphere), Word(control.word()));
    }
    set_instruction_timeout(&mut builder, PPU_START_TIMEOUT);
    for hemisphere in Hemisphere::iter_all() {
        builder.barrier();
        builder.poll_until(
            address::ppu_memory(hemisphere, status.offset),
            u32::MAX,
            PpuCommand::Idle.word(),
        );
    }
    set_instruction_timeout(&mut builder, params.default_instruction_timeout);
    Ok(builder)
}

/// Commands both PPUs to stop, waits until they report it and asserts reset.
pub fn ppu_stop(symbols: &PpuSymbols) -> Result<PlaybackProgramBuilder> {
    let status = ppu::internal_block(symbols, "status")?;
    let stopped = ppu::internal_block(symbols, "stopped")?;
    let mut builder = PlaybackProgramBuilder::new();
    for hemisphere in Hemisphere::iter_all() {
        builder.write(
            address::ppu_memory(hemisphere, status.offset),
            Word(PpuCommand::Stop.word()),
        );
    }
    for hemisphere in Hemisphere::iter_all() {
        builder.barrier();
        builder.poll_until(address::ppu_memory(hemisphere, stopped.offset), 1, 1);
    }
    let control = PpuControlRegister { inhibit_reset: false };
    for hemisphere in Hemisphere::iter_all() {
        builder.write(address::ppu_control(hemisphere), Word(control.word()));
    }
    builder.barrier();
    Ok(builder)
}

/// Waits for analog bias cells to settle after a change.
pub fn capmem_settling_wait(params: &HardwareParameters) -> PlaybackProgramBuilder {
    let mut builder = PlaybackProgramBuilder::new();
    builder.timer_reset();
    builder.wait_until(FpgaTime::from_duration(params.capmem_settling_time));
    builder
}

/// Read-back of chip state a running PPU program may alter.
///
/// Covers both PPU memories and, when plasticity is possible, the synapse
/// matrices row by row.
#[derive(Clone, Debug)]
pub struct GetState {
    ppu_memory: [Ticket; 2],
    synapse_rows: Vec<(Hemisphere, Ticket)>,
}

impl GetState {
    /// Appends the reads to `builder`.
    pub fn generate(builder: &mut PlaybackProgramBuilder, has_plasticity: bool) -> Self {
        let ppu_memory = Hemisphere::ALL
            .map(|hemisphere| builder.read(address::ppu_memory(hemisphere, 0), PPU_MEMORY_WORDS));
        let mut synapse_rows = Vec::new();
        if has_plasticity {
            for hemisphere in Hemisphere::iter_all() {
                for row in SynapseRow::iter_all() {
                    let start = address::synapse(hemisphere, row.value(), 0);
                    synapse_rows.push((hemisphere, builder.read(start, SYNAPSE_ROW_WORDS)));
                }
            }
        }
        builder.barrier();
        Self {
            ppu_memory,
            synapse_rows,
        }
    }

    /// Whether every read was executed.
    pub fn is_valid(&self) -> bool {
        self.ppu_memory.iter().all(Ticket::is_valid)
            && self.synapse_rows.iter().all(|(_, t)| t.is_valid())
    }

    /// Writes the read-back state into `chip`.
    pub fn apply(&self, chip: &mut Chip) -> Result<()> {
        for (hemisphere, ticket) in Hemisphere::iter_all().zip(&self.ppu_memory) {
            chip.ppu_memory[hemisphere.value()] = ticket.get()?.iter().map(|w| w.0).collect();
        }
        for (_, ticket) in &self.synapse_rows {
            for (i, &word) in ticket.get()?.iter().enumerate() {
                chip.write(ticket.address().offset(i), word)?;
            }
        }
        Ok(())
    }

    /// Address/word pairs of everything read.
    pub fn words(&self) -> Result<Vec<(Address, Word)>> {
        let mut words = Vec::new();
        let tickets = self.ppu_memory.iter().chain(self.synapse_rows.iter().map(|(_, t)| t));
        for ticket in tickets {
            let base = ticket.address();
            words.extend(
                ticket
                    .get()?
                    .iter()
                    .enumerate()
                    .map(|(i, &w)| (base.offset(i), w)),
            );
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow_hw::Instruction;
    use sigflow_hw::ppu::{PpuMemoryBlock, SymbolLocation};

    fn symbols() -> PpuSymbols {
        let mut symbols = PpuSymbols::new();
        symbols.insert(
            "status".into(),
            SymbolLocation::Internal(PpuMemoryBlock::new(100, 1).unwrap()),
        );
        symbols.insert(
            "stopped".into(),
            SymbolLocation::Internal(PpuMemoryBlock::new(101, 1).unwrap()),
        );
        symbols
    }

    #[test]
    fn start_polls_status_of_both_hemispheres() {
        let builder = ppu_start(&symbols(), &HardwareParameters::default()).unwrap();
        let polls: Vec<_> = builder
            .instructions()
            .iter()
            .filter_map(|i| match i {
                Instruction::PollUntil { address, expected, .. } => Some((*address, *expected)),
                _ => None,
            })
            .collect();
        assert_eq!(
            polls,
            vec![
                (address::ppu_memory(Hemisphere::Top, 100), 0),
                (address::ppu_memory(Hemisphere::Bottom, 100), 0),
            ]
        );
        assert!(matches!(
            builder.instructions().last(),
            Some(Instruction::Write { address: Address(map::INSTRUCTION_TIMEOUT), .. })
        ));
    }

    #[test]
    fn stop_requires_stopped_symbol() {
        let mut symbols = symbols();
        assert!(ppu_stop(&symbols).is_ok());
        symbols.remove("stopped");
        assert!(ppu_stop(&symbols).is_err());
    }

    #[test]
    fn get_state_reads_synapses_only_with_plasticity() {
        let mut without = PlaybackProgramBuilder::new();
        GetState::generate(&mut without, false);
        let mut with = PlaybackProgramBuilder::new();
        let state = GetState::generate(&mut with, true);
        assert_eq!(without.len(), 3);
        assert_eq!(with.len(), 3 + 2 * SynapseRow::SIZE);
        assert!(!state.is_valid());
    }
}
