//! Per-chip program handed to a [`StatefulConnection`](crate::StatefulConnection).

use sigflow_hw::ppu::PpuSymbols;
use sigflow_hw::{Chip, ChipOnConnection, PlaybackProgram, PlaybackProgramBuilder};

/// Everything one execution instance sends to its chip.
///
/// `chip_configs` holds the configuration of every realtime column, in
/// order. The first one is applied before `programs` run; the last one is
/// what the chip holds afterwards.
#[derive(Debug, Default)]
pub struct ChipProgram {
    /// Target chip on the connection.
    pub chip: ChipOnConnection,
    /// Configuration per realtime column.
    pub chip_configs: Vec<Chip>,
    /// Programs executed back to back.
    pub programs: Vec<PlaybackProgram>,
    /// Symbols of the loaded PPU program, if any.
    pub ppu_symbols: Option<PpuSymbols>,
    /// Contents of the FPGA-side DRAM used by the PPU program.
    pub external_ppu_dram_memory_config: Option<Vec<u8>>,
    /// Instructions run before the initial configuration.
    pub pre_initial_config_hook: PlaybackProgramBuilder,
    /// Whether user hooks are placed around the realtime sections.
    pub has_hooks_around_realtime: bool,
}

impl ChipProgram {
    /// Creates a program for `chip` with a single configuration.
    pub fn new(chip: ChipOnConnection, config: Chip) -> Self {
        Self {
            chip,
            chip_configs: vec![config],
            ..Self::default()
        }
    }

    /// Configuration applied before the first program.
    pub fn initial_config(&self) -> Option<&Chip> {
        self.chip_configs.first()
    }

    /// Configuration held after the last program.
    pub fn final_config(&self) -> Option<&Chip> {
        self.chip_configs.last()
    }
}
