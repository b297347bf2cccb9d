//! Caller-supplied instructions injected around an execution instance.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sigflow_hw::{AbsoluteTimePlaybackProgramBuilder, PlaybackProgramBuilder};

/// Value of a PPU symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PpuSymbolValue {
    /// Words in internal PPU memory, top then bottom hemisphere.
    Internal([Vec<u32>; 2]),
    /// Bytes in external PPU memory.
    External(Vec<u8>),
    /// Bytes in external DRAM.
    ExternalDram(Vec<u8>),
}

/// Instruction streams and symbol accesses added to one execution instance.
///
/// The builders are consumed by the execution; every batch entry sees the
/// `inside_realtime*` streams, the others are emitted once.
#[derive(Debug, Default)]
pub struct ExecutionInstanceHooks {
    /// Before the static configuration is written.
    pub pre_static_config: PlaybackProgramBuilder,
    /// After configuration, before the first realtime interval.
    pub pre_realtime: PlaybackProgramBuilder,
    /// At the begin of every realtime interval.
    pub inside_realtime_begin: PlaybackProgramBuilder,
    /// During every realtime interval, timed relative to its begin.
    pub inside_realtime: AbsoluteTimePlaybackProgramBuilder,
    /// At the end of every realtime interval.
    pub inside_realtime_end: PlaybackProgramBuilder,
    /// After the last realtime interval.
    pub post_realtime: PlaybackProgramBuilder,
    /// Symbols written before the PPU starts.
    pub write_ppu_symbols: BTreeMap<String, PpuSymbolValue>,
    /// Symbols read after every batch entry.
    pub read_ppu_symbols: BTreeSet<String>,
}

impl ExecutionInstanceHooks {
    /// Whether the hooks add nothing.
    pub fn is_empty(&self) -> bool {
        self.pre_static_config.is_empty()
            && self.pre_realtime.is_empty()
            && self.inside_realtime_begin.is_empty()
            && self.inside_realtime.is_empty()
            && self.inside_realtime_end.is_empty()
            && self.post_realtime.is_empty()
            && self.write_ppu_symbols.is_empty()
            && self.read_ppu_symbols.is_empty()
    }
}
