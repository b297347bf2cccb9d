//! Error types for graph execution.

use thiserror::Error;

use sigflow_backend::BackendError;
use sigflow_core::{DataError, ExecutionInstanceId, GraphError, VertexId};
use sigflow_hw::HardwareError;

/// Errors raised while validating, generating or running an execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The request cannot be executed; no hardware was touched.
    #[error("execution request invalid: {0}")]
    Validation(String),

    /// Graph lookup failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Input or output data is inconsistent.
    #[error(transparent)]
    Data(#[from] DataError),

    /// Encoding, decoding or addressing failed.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// The hardware round trip failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A vertex expected data that no input or upstream execution provided.
    #[error("no data for vertex {vertex} in realtime column {column}")]
    MissingData {
        /// Vertex lacking data.
        vertex: VertexId,
        /// Realtime column.
        column: usize,
    },

    /// A hook named a symbol the generated PPU program does not define.
    #[error("PPU symbol `{0}` is not defined by the generated program")]
    UnknownSymbol(String),

    /// Hooks access PPU symbols of an execution instance without PPU program.
    #[error("{0} accesses PPU symbols but runs no PPU program")]
    NoPpuProgram(ExecutionInstanceId),

    /// At least one execution instance failed; successors were skipped.
    #[error("{} execution instance(s) failed ({} skipped): {failed:?}", failed.len(), skipped.len())]
    NodesFailed {
        /// Failed execution instances.
        failed: Vec<ExecutionInstanceId>,
        /// Execution instances not run because an upstream one failed.
        skipped: Vec<ExecutionInstanceId>,
        /// First failure.
        #[source]
        source: Box<ExecutionError>,
    },

    /// Internal inconsistency; indicates a bug rather than bad input.
    #[error("logic error: {0}")]
    Logic(String),
}

impl ExecutionError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error is a programming error rather than a runtime failure.
    pub fn is_logic_error(&self) -> bool {
        match self {
            Self::Logic(_) => true,
            Self::Backend(err) => err.is_logic_error(),
            Self::NodesFailed { source, .. } => source.is_logic_error(),
            _ => false,
        }
    }
}

/// Result alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_failed_names_instances_and_keeps_source() {
        let ei = ExecutionInstanceId::default();
        let err = ExecutionError::NodesFailed {
            failed: vec![ei],
            skipped: vec![ExecutionInstanceId::step(1)],
            source: Box::new(ExecutionError::Backend(BackendError::transport("sim-0", "down"))),
        };
        assert!(err.to_string().starts_with("1 execution instance(s) failed (1 skipped)"));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("transport failure on sim-0: down"));
    }

    #[test]
    fn released_connection_is_a_logic_error() {
        assert!(ExecutionError::Backend(BackendError::ConnectionReleased).is_logic_error());
        assert!(!ExecutionError::validation("x").is_logic_error());
    }
}
