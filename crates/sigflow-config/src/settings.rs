//! Executor, simulator, hardware timing and logging settings.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sigflow_backend::{SimulatedConnection, SimulationHandle, SimulationOptions, StatefulConnection};
use sigflow_hw::time::FPGA_CLOCK_CYCLES_PER_US;
use sigflow_hw::{ConnectionOnExecutor, FpgaTime, HardwareParameters};

use crate::error::{ConfigError, Result};

/// Complete sigflow configuration.
///
/// # TOML Format
///
/// Every section and key is optional; missing values take their defaults
/// and unknown keys are rejected.
///
/// ```toml
/// [executor]
/// enable_differential_config = true
/// worker_threads = 0
///
/// [simulator]
/// connections = 2
/// chips_per_connection = 1
/// round_trip_latency_us = 0
/// shared_service = false
/// playback_memory_size = 1048576
///
/// [hardware]
/// fpga_clock_cycles_per_us = 125
/// wait_before_realtime_us = 1
/// periodic_cadc_fpga_wait_clock_cycles = 1000
/// enable_cadc_baseline = true
///
/// [logging]
/// filter = "info"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Executor behaviour.
    pub executor: ExecutorSettings,
    /// Simulated connections.
    pub simulator: SimulatorSettings,
    /// Hardware timing.
    pub hardware: HardwareSettings,
    /// Diagnostics.
    pub logging: LoggingSettings,
}

/// `[executor]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Write only configuration words that changed since the last run.
    pub enable_differential_config: bool,
    /// Execution instances processed concurrently; 0 uses the available parallelism.
    pub worker_threads: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            enable_differential_config: true,
            worker_threads: 0,
        }
    }
}

/// `[simulator]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorSettings {
    /// Simulated connections created.
    pub connections: u32,
    /// Chips behind every connection.
    pub chips_per_connection: usize,
    /// Artificial latency per program.
    pub round_trip_latency_us: u64,
    /// Behave like a shared, time-multiplexed service.
    pub shared_service: bool,
    /// Bytes per program before programs are split.
    pub playback_memory_size: usize,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        let options = SimulationOptions::default();
        Self {
            connections: 1,
            chips_per_connection: options.chips_per_connection,
            round_trip_latency_us: 0,
            shared_service: options.shared_service,
            playback_memory_size: options.playback_memory_size,
        }
    }
}

/// `[hardware]` section.
///
/// Mirrors [`HardwareParameters`] in integer units suitable for TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HardwareSettings {
    /// FPGA clock; only the frequency of the supported hardware is accepted.
    pub fpga_clock_cycles_per_us: u64,
    /// Settling wait before every realtime interval.
    pub wait_before_realtime_us: u64,
    /// Wait after every realtime interval before readout.
    pub wait_after_realtime_us: u64,
    /// FPGA cycles the PPU timestamp leads the FPGA timer by.
    pub periodic_cadc_fpga_wait_clock_cycles: u32,
    /// PPU cycles before the first periodic sample.
    pub periodic_cadc_ppu_wait_clock_cycles: u32,
    /// Periodic CADC samples fitting the external sample buffer.
    pub num_cadc_samples_in_extmem: usize,
    /// Lower bound of the duration of one periodic sample.
    pub approx_cadc_sample_duration_ns: u64,
    /// Timeout while waiting for the PPU to finish.
    pub ppu_finish_timeout_us: u64,
    /// Instruction timeout restored after polling.
    pub default_instruction_timeout_us: u64,
    /// Wait after analog bias changes.
    pub capmem_settling_time_us: u64,
    /// Subtract a CADC baseline read before every realtime interval.
    pub enable_cadc_baseline: bool,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self::from(&HardwareParameters::default())
    }
}

impl From<&HardwareParameters> for HardwareSettings {
    fn from(params: &HardwareParameters) -> Self {
        Self {
            fpga_clock_cycles_per_us: FPGA_CLOCK_CYCLES_PER_US,
            wait_before_realtime_us: params.wait_before_realtime.as_us(),
            wait_after_realtime_us: params.wait_after_realtime.as_us(),
            periodic_cadc_fpga_wait_clock_cycles: params.periodic_cadc_fpga_wait_clock_cycles,
            periodic_cadc_ppu_wait_clock_cycles: params.periodic_cadc_ppu_wait_clock_cycles,
            num_cadc_samples_in_extmem: params.num_cadc_samples_in_extmem,
            approx_cadc_sample_duration_ns: u64::try_from(
                params.approx_cadc_sample_duration.as_nanos(),
            )
            .unwrap_or(u64::MAX),
            ppu_finish_timeout_us: params.ppu_finish_timeout.as_us(),
            default_instruction_timeout_us: params.default_instruction_timeout.as_us(),
            capmem_settling_time_us: u64::try_from(params.capmem_settling_time.as_micros())
                .unwrap_or(u64::MAX),
            enable_cadc_baseline: params.enable_cadc_baseline,
        }
    }
}

impl HardwareSettings {
    /// Timing parameters handed to connections and the executor.
    pub fn parameters(&self) -> HardwareParameters {
        HardwareParameters {
            wait_before_realtime: FpgaTime::from_us(self.wait_before_realtime_us),
            wait_after_realtime: FpgaTime::from_us(self.wait_after_realtime_us),
            periodic_cadc_fpga_wait_clock_cycles: self.periodic_cadc_fpga_wait_clock_cycles,
            periodic_cadc_ppu_wait_clock_cycles: self.periodic_cadc_ppu_wait_clock_cycles,
            num_cadc_samples_in_extmem: self.num_cadc_samples_in_extmem,
            approx_cadc_sample_duration: Duration::from_nanos(self.approx_cadc_sample_duration_ns),
            ppu_finish_timeout: FpgaTime::from_us(self.ppu_finish_timeout_us),
            default_instruction_timeout: FpgaTime::from_us(self.default_instruction_timeout_us),
            capmem_settling_time: Duration::from_micros(self.capmem_settling_time_us),
            enable_cadc_baseline: self.enable_cadc_baseline,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl Config {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        std::fs::write(path, self.to_toml()?).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulator;
        if sim.connections == 0 {
            return Err(ConfigError::validation("simulator.connections must be at least 1"));
        }
        if sim.chips_per_connection == 0 {
            return Err(ConfigError::validation(
                "simulator.chips_per_connection must be at least 1",
            ));
        }
        if sim.playback_memory_size == 0 {
            return Err(ConfigError::validation(
                "simulator.playback_memory_size must be positive",
            ));
        }
        let hw = &self.hardware;
        if hw.fpga_clock_cycles_per_us != FPGA_CLOCK_CYCLES_PER_US {
            return Err(ConfigError::validation(format!(
                "hardware.fpga_clock_cycles_per_us is {}, the supported hardware runs at {}",
                hw.fpga_clock_cycles_per_us, FPGA_CLOCK_CYCLES_PER_US
            )));
        }
        if hw.num_cadc_samples_in_extmem == 0 {
            return Err(ConfigError::validation(
                "hardware.num_cadc_samples_in_extmem must be positive",
            ));
        }
        if hw.approx_cadc_sample_duration_ns == 0 {
            return Err(ConfigError::validation(
                "hardware.approx_cadc_sample_duration_ns must be positive",
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::validation("logging.filter must not be empty"));
        }
        Ok(())
    }

    /// Options of simulated connection `index`.
    pub fn simulation_options(&self, index: u32) -> SimulationOptions {
        let sim = &self.simulator;
        SimulationOptions {
            identifier: format!("sim-{index}"),
            chips_per_connection: sim.chips_per_connection,
            round_trip_latency: Duration::from_micros(sim.round_trip_latency_us),
            shared_service: sim.shared_service,
            playback_memory_size: sim.playback_memory_size,
            interrupt_every: None,
            params: self.hardware.parameters(),
        }
    }

    /// Opens all simulated connections.
    ///
    /// The handles observe the connections after they moved into the
    /// returned map.
    pub fn connect(&self) -> (BTreeMap<ConnectionOnExecutor, StatefulConnection>, Vec<SimulationHandle>) {
        let params = self.hardware.parameters();
        let mut handles = Vec::new();
        let connections = (0..self.simulator.connections)
            .map(|index| {
                let connection = SimulatedConnection::new(self.simulation_options(index));
                handles.push(connection.handle());
                let stateful = StatefulConnection::new(
                    connection,
                    self.executor.enable_differential_config,
                    params.clone(),
                );
                (ConnectionOnExecutor(index), stateful)
            })
            .collect();
        (connections, handles)
    }
}
