//! Just-in-time execution of sigflow graphs.
//!
//! The executor splits a graph along its execution instances, runs every
//! instance on its chip once the instances it depends on have finished,
//! and merges the decoded results into one [`OutputData`](sigflow_core::OutputData).
//!
//! # Architecture
//!
//! ```text
//!   JitGraphExecutor::run(graphs, configs, input, hooks)
//!        │ validate
//!        ▼
//!   Scheduler ── one task per execution instance, dependency ordered
//!        │
//!        ▼
//!   ExecutionInstanceNode
//!        ├─ RealtimeSnippet per graph (pre_process / generate / post_process)
//!        ├─ PpuProgram shared by all columns
//!        ├─ ConfigVisitor per column
//!        └─ ChipProgram ──► StatefulConnection::run
//! ```
//!
//! - [`executor`]: [`JitGraphExecutor`], request validation and connection
//!   bookkeeping.
//! - [`scheduler`]: dependency-ordered dispatch onto a worker pool with
//!   failure aggregation.
//! - [`node`]: program assembly and result collection for one execution
//!   instance.
//! - [`snippet`]: one realtime column: host data, timed instruction
//!   generation and decoding of recorded data.
//! - [`ppu_program`]: memory layout and symbol table of the PPU program.
//! - [`config_visitor`]: static chip configuration from hardware vertices.

pub mod config_visitor;
pub mod error;
pub mod executor;
pub mod node;
pub mod ppu_program;
pub mod scheduler;
pub mod snippet;

pub use config_visitor::ConfigVisitor;
pub use error::{ExecutionError, Result};
pub use executor::{ChipConfigs, Hooks, JitGraphExecutor};
pub use node::ExecutionInstanceNode;
pub use ppu_program::{PpuProgram, PpuUsage};
pub use scheduler::Scheduler;
