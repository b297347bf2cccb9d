//! Error types for connections and stateful execution.

use thiserror::Error;

use sigflow_hw::{Address, ChipOnConnection, HardwareError};

/// Errors raised by connections and [`StatefulConnection`](crate::StatefulConnection).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The connection was moved out with `release()`; using it again is a
    /// programming error, not a hardware failure.
    #[error("connection was released and can no longer be used")]
    ConnectionReleased,

    /// Transport-level failure while sending or receiving a program.
    #[error("transport failure on {connection}: {message}")]
    Transport {
        /// Identifier of the connection.
        connection: String,
        /// What went wrong.
        message: String,
    },

    /// A program does not fit into playback memory.
    #[error("program of {size} bytes exceeds playback memory of {capacity} bytes")]
    ProgramTooLarge {
        /// Program size in bytes.
        size: usize,
        /// Playback memory size in bytes.
        capacity: usize,
    },

    /// A program targets a chip the connection does not have.
    #[error("{chip} not present on connection with {available} chips")]
    UnknownChip {
        /// Requested chip.
        chip: ChipOnConnection,
        /// Chips on the connection.
        available: usize,
    },

    /// A program carries no chip configuration.
    #[error("program for {0} carries no chip configuration")]
    NoChipConfig(ChipOnConnection),

    /// A write targeted a read-only register.
    #[error("register {0} is read-only")]
    ReadOnly(Address),

    /// Encoding, decoding or addressing failed.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// At least one program of a stateful run failed.
    #[error("{failed} of {total} playback programs failed")]
    RunFailed {
        /// Number of failed programs.
        failed: usize,
        /// Number of programs run.
        total: usize,
        /// First failure.
        #[source]
        source: Box<BackendError>,
    },
}

impl BackendError {
    /// Creates a transport error for `connection`.
    pub fn transport(connection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            connection: connection.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a programming error rather than a runtime failure.
    pub fn is_logic_error(&self) -> bool {
        matches!(self, Self::ConnectionReleased)
    }
}

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failed_keeps_source() {
        let err = BackendError::RunFailed {
            failed: 1,
            total: 3,
            source: Box::new(BackendError::transport("sim-0", "link down")),
        };
        assert_eq!(err.to_string(), "1 of 3 playback programs failed");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("transport failure on sim-0: link down"));
    }

    #[test]
    fn only_release_is_a_logic_error() {
        assert!(BackendError::ConnectionReleased.is_logic_error());
        assert!(!BackendError::transport("x", "y").is_logic_error());
    }
}
