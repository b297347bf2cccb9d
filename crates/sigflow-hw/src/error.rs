//! Error types for hardware containers and instruction builders.

use thiserror::Error;

use crate::address::Address;

/// Errors raised while encoding, decoding or assembling hardware programs.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// A coordinate value lies outside its valid range.
    #[error("{kind} value {value} out of range (size {size})")]
    CoordinateOutOfRange {
        /// Coordinate type name.
        kind: &'static str,
        /// Offending value.
        value: usize,
        /// Number of valid values.
        size: usize,
    },

    /// An address does not belong to any known register region.
    #[error("unknown address {0}")]
    UnknownAddress(Address),

    /// A ticket was queried before the program carrying it was executed.
    #[error("ticket for {0} words at {1} is not yet valid")]
    TicketNotValid(usize, Address),

    /// A PPU memory block does not fit into the memory it is placed in.
    #[error("PPU memory block of {size} bytes at offset {offset} exceeds capacity {capacity}")]
    PpuBlockOutOfRange {
        /// Byte offset of the block.
        offset: usize,
        /// Block size in bytes.
        size: usize,
        /// Capacity of the memory.
        capacity: usize,
    },

    /// A symbol was looked up that the PPU program does not define.
    #[error("unknown PPU symbol '{0}'")]
    UnknownSymbol(String),

    /// A PPU image could not be interpreted.
    #[error("malformed PPU image: {0}")]
    MalformedPpuImage(String),
}

/// Result alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;
