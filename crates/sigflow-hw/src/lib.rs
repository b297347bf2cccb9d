//! Hardware collaborators of the sigflow execution scheduler.
//!
//! This crate models the parts of a neuromorphic chip the scheduler talks
//! to without owning them: typed coordinates, the static configuration image
//! and its word encoding, time units of the FPGA and PPU clock domains, the
//! spike and MADC event types, and the instruction-stream builders that
//! become playback programs.
//!
//! # Architecture
//!
//! ```text
//!   coord ──► chip ──► address ──► builder ──► PlaybackProgram
//!     │         │                     ▲
//!     └──► event┘        ppu ─────────┘
//! ```
//!
//! - [`coord`]: ranged newtypes for neuron columns, synapse rows, crossbar
//!   nodes, padi busses and chip/connection placement.
//! - [`chip`]: [`Chip`](chip::Chip), the complete static configuration,
//!   encodable into `(Address, Word)` pairs and decodable word by word.
//! - [`builder`]: sequential and absolute-time instruction builders with
//!   [`Ticket`](builder::Ticket)s for reads resolved after execution.
//! - [`ppu`]: on-chip processor memory blocks, symbol table, command words
//!   and the image header layout shared with the simulated backend.
//! - [`health`], [`timing`]: telemetry counters and timing constants.

pub mod address;
pub mod builder;
pub mod chip;
pub mod coord;
pub mod error;
pub mod event;
pub mod health;
pub mod ppu;
pub mod time;
pub mod timing;

pub use address::{Address, Word};
pub use builder::{
    AbsoluteTimePlaybackProgramBuilder, Instruction, PlaybackProgram, PlaybackProgramBuilder,
    ReadResult, Ticket,
};
pub use chip::Chip;
pub use coord::{ChipOnConnection, ChipOnExecutor, ConnectionOnExecutor, Hemisphere};
pub use error::{HardwareError, Result};
pub use event::{MadcSampleFromChip, SpikeFromChip, SpikeLabel, TimedSpikeToChip};
pub use health::HealthSnapshot;
pub use time::{ChipTime, FpgaTime};
pub use timing::HardwareParameters;
