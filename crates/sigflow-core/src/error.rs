//! Error types for graph construction and batched data.

use thiserror::Error;

use crate::connection_type::ConnectionType;
use crate::graph::VertexId;
use crate::port::Port;

/// Errors raised while building or (de)serializing a [`Graph`](crate::Graph).
///
/// Every variant is raised before the graph is mutated; a failed call leaves
/// the graph exactly as it was.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A referenced vertex does not exist.
    #[error("vertex {0} not found")]
    VertexNotFound(VertexId),

    /// A vertex value violates its own invariants.
    #[error("invalid {kind}: {reason}")]
    InvalidVertex {
        /// Vertex kind.
        kind: &'static str,
        /// What is wrong.
        reason: String,
    },

    /// Input count does not match a non-variadic vertex.
    #[error("{kind} expects {expected} inputs, got {got}")]
    InputCount {
        /// Target vertex kind.
        kind: &'static str,
        /// Declared number of input ports.
        expected: usize,
        /// Number of inputs supplied.
        got: usize,
    },

    /// Too few inputs for a variadic vertex.
    #[error("{kind} expects at least {minimum} inputs, got {got}")]
    TooFewInputs {
        /// Target vertex kind.
        kind: &'static str,
        /// Minimal number of inputs.
        minimum: usize,
        /// Number of inputs supplied.
        got: usize,
    },

    /// A variadic vertex declares no input port.
    #[error("{0} declares a variadic input without any input port")]
    VariadicWithoutPorts(&'static str),

    /// A port restriction is not a sub-range of the source output.
    #[error("input {index}: port restriction is not a sub-range of source output {source_port}")]
    InvalidRestriction {
        /// Input position.
        index: usize,
        /// Source output port.
        source_port: Port,
    },

    /// Source output does not match the declared input port.
    #[error("input {index}: source provides {provided}, port expects {expected}")]
    PortMismatch {
        /// Input position.
        index: usize,
        /// Port provided by the source (after restriction).
        provided: Port,
        /// Declared input port.
        expected: Port,
    },

    /// The target does not accept input from this source kind or configuration.
    #[error("input {index}: {target} does not support input from {source_kind}")]
    UnsupportedInput {
        /// Input position.
        index: usize,
        /// Source vertex kind.
        source_kind: &'static str,
        /// Target vertex kind.
        target: &'static str,
    },

    /// Cross-instance capable vertices exchanging crossable data share an instance.
    #[error("input {index}: connection of type {connection_type:?} must cross execution instances")]
    MustCrossExecutionInstances {
        /// Input position.
        index: usize,
        /// Connection type of the edge.
        connection_type: ConnectionType,
    },

    /// Edge between execution instances that may not cross.
    #[error("input {index}: connection of type {connection_type:?} cannot cross execution instances")]
    CannotCrossExecutionInstances {
        /// Input position.
        index: usize,
        /// Connection type of the edge.
        connection_type: ConnectionType,
    },

    /// New inputs would make a vertex depend on itself.
    #[error("vertex {0} would depend on itself")]
    CyclicVertexGraph(VertexId),

    /// The edge would close a cycle in the execution instance graph.
    #[error("execution instance graph would become cyclic")]
    CyclicExecutionInstanceGraph,

    /// A vertex carries data that fails validation.
    #[error(transparent)]
    Data(#[from] DataError),

    /// Serialized graph could not be parsed.
    #[error("graph serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Serialized graph uses an unsupported format version.
    #[error("unsupported format version {version} for {kind}")]
    UnsupportedVersion {
        /// Serialized item kind.
        kind: String,
        /// Version found.
        version: u32,
    },

    /// Serialized graph references an edge endpoint that does not exist.
    #[error("serialized edge {edge} references vertex {vertex} of {num_vertices}")]
    DanglingSerializedEdge {
        /// Edge position.
        edge: usize,
        /// Referenced vertex position.
        vertex: usize,
        /// Number of vertices serialized.
        num_vertices: usize,
    },
}

/// Errors raised by batched data containers and transformations.
#[derive(Debug, Error)]
pub enum DataError {
    /// Entries disagree on the batch size.
    #[error("data is not valid: batch sizes of entries differ")]
    Invalid,

    /// Two containers disagree on a size that must match.
    #[error("cannot merge {what}: sizes {left} and {right} differ")]
    SizeMismatch {
        /// What was merged.
        what: &'static str,
        /// Size on the left.
        left: usize,
        /// Size on the right.
        right: usize,
    },

    /// Input entry type does not fit the operation.
    #[error("unexpected data entry {found} for {operation}")]
    UnexpectedEntry {
        /// Entry kind found.
        found: &'static str,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Recorded scratchpad memory size is not word aligned.
    #[error("recorded scratchpad memory size needs to be a multiple of four, got {0}")]
    UnalignedRecording(usize),

    /// Recording data requested from a rule without recording.
    #[error("plasticity rule has no recording")]
    NoRecording,

    /// Observable not present in a recording.
    #[error("unknown observable '{0}'")]
    UnknownObservable(String),
}

/// Result alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn display_messages_name_the_failed_check() {
        let err = GraphError::InputCount {
            kind: "DataInput",
            expected: 1,
            got: 2,
        };
        assert_eq!(err.to_string(), "DataInput expects 1 inputs, got 2");

        let err = GraphError::UnsupportedInput {
            index: 0,
            source_kind: "CrossbarNode",
            target: "CrossbarL2Output",
        };
        assert!(err.to_string().contains("does not support input from CrossbarNode"));

        let err = DataError::UnalignedRecording(6);
        assert!(err.to_string().contains("multiple of four"));
    }

    #[test]
    fn serialization_error_has_source() {
        let json_err = serde_json::from_str::<u32>("x").unwrap_err();
        let err = GraphError::from(json_err);
        assert!(err.source().is_some());
        assert!(GraphError::CyclicExecutionInstanceGraph.source().is_none());
    }
}
