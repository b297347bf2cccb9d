//! Backend of the sigflow execution scheduler.
//!
//! The backend executes per-chip programs on connections and keeps track of
//! what each chip is configured with, so consecutive runs only write the
//! configuration words that changed.
//!
//! # Architecture
//!
//! ```text
//!   ChipProgram ──► StatefulConnection ──► dyn Connection ──► chip(s)
//!                     │   per-chip StatefulConnectionConfig
//!                     │   (base / differential write sets)
//!                     └──► ReinitStack (restored after schedule-out)
//! ```
//!
//! - [`connection`]: the [`Connection`] trait, time accounting and the
//!   reinit stack.
//! - [`stateful`]: [`StatefulConnection`], a thread-safe wrapper applying
//!   configurations differentially.
//! - [`stateful_config`]: base and differential write sets per chip.
//! - [`generator`]: instruction sequences for PPU start/stop, CapMem
//!   settling and PPU state read-back.
//! - [`simulated`]: a deterministic chip model behind the [`Connection`]
//!   trait, used by tests and the command line.

pub mod connection;
pub mod error;
pub mod generator;
pub mod program;
pub mod simulated;
pub mod stateful;
pub mod stateful_config;

pub use connection::{Connection, ConnectionTimeInfo, ReinitEntry, ReinitSlot, ReinitStack};
pub use error::{BackendError, Result};
pub use program::ChipProgram;
pub use simulated::{RunRecord, SimulatedConnection, SimulationHandle, SimulationOptions};
pub use stateful::{ConnectionInfo, StatefulConnection};
pub use stateful_config::StatefulConnectionConfig;
