//! Sigflow Core - dataflow graph and batched data for neuromorphic experiments
//!
//! This crate describes *what* runs on a chip: a typed, directed graph of
//! hardware and host vertices, grouped into execution instances, plus the
//! batched data flowing into and out of an execution.
//!
//! # Core Abstractions
//!
//! ## Graph
//!
//! - [`Graph`] - Vertices with per-port connection types, validated on every
//!   insertion, and the derived [`ExecutionInstanceGraph`]
//! - [`Input`] - A vertex reference with optional output sub-range
//! - [`ExecutionInstanceId`] - Logical step plus chip placement
//!
//! ## Vertices
//!
//! - [`Vertex`] - Closed set of vertex kinds, see [`vertex`]
//! - [`Port`], [`PortRestriction`], [`ConnectionType`] - Port typing
//!
//! ## Data
//!
//! - [`DataEntry`] - Batched values for one vertex
//! - [`InputData`], [`OutputData`] - Runtime snippets with timing and health
//! - [`ExecutionInstanceHooks`] - Extra instructions and PPU symbols per instance
//!
//! # Architecture
//!
//! ```text
//!   ExternalInput ─► DataInput ─► hardware vertices ─► DataOutput    (EI 0)
//!                                                          │
//!                                                 Transformation     (EI 1)
//!                                                          │
//!                    DataInput ─► hardware vertices ─► DataOutput    (EI 2)
//! ```
//!
//! Only `Data*` connection types cross execution instances; the cross-instance
//! edges induce the [`ExecutionInstanceGraph`], which must stay acyclic.
//!
//! # Example
//!
//! ```rust,ignore
//! use sigflow_core::{ConnectionType, ExecutionInstanceId, Graph, Input};
//! use sigflow_core::vertex::{DataInput, ExternalInput};
//!
//! let mut graph = Graph::default();
//! let ei = ExecutionInstanceId::step(0);
//! let ext = graph.add(ExternalInput::new(ConnectionType::DataInt8, 123)?, ei, [])?;
//! graph.add(DataInput::new(ConnectionType::Int8, 123)?, ei, [Input::from(ext)])?;
//! ```

pub mod connection_type;
pub mod data;
pub mod error;
pub mod execution_instance;
pub mod graph;
pub mod health_info;
pub mod hooks;
pub mod port;
pub mod time_info;
pub mod vertex;

pub use connection_type::ConnectionType;
pub use data::{
    DataEntry, DataSnippet, InputData, OutputData, PpuSymbolReadout, TimedData,
    TimedDataSequence, TimedMadcSampleFromChip, TimedSpikeFromChip,
};
pub use error::{DataError, GraphError, Result};
pub use execution_instance::ExecutionInstanceId;
pub use graph::{Edge, EdgeId, ExecutionInstanceGraph, Graph, Input, VertexId};
pub use health_info::ExecutionHealthInfo;
pub use hooks::{ExecutionInstanceHooks, PpuSymbolValue};
pub use port::{Port, PortRestriction};
pub use time_info::ExecutionTimeInfo;
pub use vertex::{Vertex, VertexProperties};
