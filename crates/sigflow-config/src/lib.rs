//! Configuration and experiment files for sigflow.
//!
//! Two TOML documents drive a run:
//!
//! - **Config**: executor options, the simulated connections to open,
//!   hardware timing parameters and the default log filter
//! - **Experiment**: execution instances with their inputs and readouts,
//!   built into a graph, input data and chip configurations
//!
//! # Example
//!
//! ```rust,no_run
//! use sigflow_config::{Config, Experiment};
//!
//! let config = Config::load("sigflow.toml").unwrap();
//! let experiment = Experiment::load("experiment.toml").unwrap();
//! let built = experiment.build().unwrap();
//! let (connections, _handles) = config.connect();
//! println!("{} instances on {} connections", built.instances.len(), connections.len());
//! ```

mod error;
mod experiment;
mod settings;

pub use error::{ConfigError, Result};
pub use experiment::{
    CadcSpec, Experiment, ExperimentGraph, InstanceSpec, InstanceVertices, MadcSpec, ReadoutMode,
    SpikeSpec,
};
pub use settings::{Config, ExecutorSettings, HardwareSettings, LoggingSettings, SimulatorSettings};
