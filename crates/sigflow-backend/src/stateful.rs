//! Connection plus per-chip differential configuration state.
//!
//! [`StatefulConnection`] is shared between worker threads. It serializes
//! access to the wrapped [`Connection`] and keeps one
//! [`StatefulConnectionConfig`] per chip, so consecutive runs only write
//! what changed.
//!
//! # Locking
//!
//! Two mutexes, always taken in the order `connection` then `config`:
//!
//! ```text
//!  differential mode      ├── connection ─────────────────────────────┤
//!                         ├── config ── set_chip ─ run ─ update ──────┤
//!
//!  full writes            ├ config ┤ ├── connection ── run ──┤ ├ config ┤
//! ```
//!
//! In differential mode "what changed since the last apply" is only valid
//! while no other thread applies in between, so both locks span compare,
//! execution and state update. Without it, the lock is held only around
//! execution. Static information and time info are readable without
//! taking either lock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sigflow_hw::{
    Chip, ChipOnConnection, HardwareParameters, PlaybackProgram, PlaybackProgramBuilder,
};
use tracing::{error, trace, warn};

use crate::connection::{Connection, ConnectionTimeInfo, ReinitEntry, ReinitSlot};
use crate::error::{BackendError, Result};
use crate::generator::{self, GetState};
use crate::program::ChipProgram;
use crate::stateful_config::StatefulConnectionConfig;

/// Information about a connection that does not change while it is open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Stable identifier of the hardware setup.
    pub unique_identifier: String,
    /// FPGA bitfile description.
    pub bitfile_info: String,
    /// Remote service version.
    pub remote_repo_state: String,
    /// Shared, time-multiplexed service.
    pub is_quiggeldy: bool,
    /// Chips on the connection.
    pub chips: Vec<ChipOnConnection>,
    /// Playback memory per program in bytes.
    pub playback_memory_size: usize,
}

impl ConnectionInfo {
    fn of(connection: &dyn Connection) -> Self {
        Self {
            unique_identifier: connection.unique_identifier(),
            bitfile_info: connection.bitfile_info(),
            remote_repo_state: connection.remote_repo_state(),
            is_quiggeldy: connection.is_quiggeldy(),
            chips: connection.chips_on_connection(),
            playback_memory_size: connection.playback_memory_size(),
        }
    }
}

/// Write sets and flags derived from one `set_chip`.
struct Prepared {
    base: PlaybackProgramBuilder,
    differential: PlaybackProgramBuilder,
    enforce_base: bool,
    has_capmem_changes: bool,
    nothing_changed: bool,
}

/// Result of the locked execution section.
struct Executed {
    duration: Duration,
    failures: Vec<BackendError>,
    total: usize,
}

/// Thread-safe connection tracking the configuration of its chips.
pub struct StatefulConnection {
    connection: Mutex<Option<Box<dyn Connection>>>,
    config: Mutex<BTreeMap<ChipOnConnection, StatefulConnectionConfig>>,
    time_info: Mutex<ConnectionTimeInfo>,
    info: ConnectionInfo,
    enable_differential_config: bool,
    params: HardwareParameters,
}

impl std::fmt::Debug for StatefulConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulConnection")
            .field("info", &self.info)
            .field("enable_differential_config", &self.enable_differential_config)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl StatefulConnection {
    /// Wraps `connection`.
    pub fn new(
        connection: impl Connection + 'static,
        enable_differential_config: bool,
        params: HardwareParameters,
    ) -> Self {
        Self::from_boxed(Box::new(connection), enable_differential_config, params)
    }

    /// Wraps an already boxed connection.
    pub fn from_boxed(
        connection: Box<dyn Connection>,
        enable_differential_config: bool,
        params: HardwareParameters,
    ) -> Self {
        let info = ConnectionInfo::of(connection.as_ref());
        let time_info = connection.time_info();
        Self {
            connection: Mutex::new(Some(connection)),
            config: Mutex::new(BTreeMap::new()),
            time_info: Mutex::new(time_info),
            info,
            enable_differential_config,
            params,
        }
    }

    /// Whether only changed configuration words are written.
    pub fn enable_differential_config(&self) -> bool {
        self.enable_differential_config
    }

    /// Hardware timing parameters used for generated sequences.
    pub fn params(&self) -> &HardwareParameters {
        &self.params
    }

    /// Static connection information.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Accumulated time information, as of the last completed run.
    pub fn time_info(&self) -> ConnectionTimeInfo {
        *self.time_info.lock()
    }

    /// Stable identifier of the hardware setup.
    pub fn unique_identifier(&self) -> &str {
        &self.info.unique_identifier
    }

    /// FPGA bitfile description.
    pub fn bitfile_info(&self) -> &str {
        &self.info.bitfile_info
    }

    /// Remote service version.
    pub fn remote_repo_state(&self) -> &str {
        &self.info.remote_repo_state
    }

    /// Whether the connection is a shared, time-multiplexed service.
    pub fn is_quiggeldy(&self) -> bool {
        self.info.is_quiggeldy
    }

    /// Chips on the connection.
    pub fn chips_on_connection(&self) -> &[ChipOnConnection] {
        &self.info.chips
    }

    /// Playback memory per program in bytes.
    pub fn playback_memory_size(&self) -> usize {
        self.info.playback_memory_size
    }

    /// Whether [`release`](Self::release) was called.
    pub fn is_released(&self) -> bool {
        self.connection.lock().is_none()
    }

    /// Moves the wrapped connection out. Later use is a logic error.
    pub fn release(&self) -> Result<Box<dyn Connection>> {
        let connection = self
            .connection
            .lock()
            .take()
            .ok_or(BackendError::ConnectionReleased)?;
        self.config.lock().clear();
        Ok(connection)
    }

    /// Whether the tracked configuration of `chip` is fresh.
    pub fn is_fresh(&self, chip: ChipOnConnection) -> bool {
        self.config.lock().get(&chip).is_none_or(StatefulConnectionConfig::is_fresh)
    }

    /// Copy of the tracked configuration state of `chip`.
    pub fn config_state(&self, chip: ChipOnConnection) -> Option<StatefulConnectionConfig> {
        self.config.lock().get(&chip).cloned()
    }

    /// Applies the configuration of `program` and runs its programs.
    ///
    /// Returns the hardware execution time. If any program fails, the
    /// tracked state of the chip is reset to fresh and
    /// [`BackendError::RunFailed`] is returned after all programs were
    /// attempted.
    pub fn run(&self, program: &mut ChipProgram) -> Result<Duration> {
        let chip = program.chip;
        if !self.info.chips.contains(&chip) {
            return Err(BackendError::UnknownChip {
                chip,
                available: self.info.chips.len(),
            });
        }
        let initial = program
            .initial_config()
            .cloned()
            .ok_or(BackendError::NoChipConfig(chip))?;

        let timer = Instant::now();
        let schedule_out_replacement = match &program.ppu_symbols {
            Some(symbols) => {
                let mut builder = generator::ppu_stop(symbols)?;
                GetState::generate(&mut builder, true);
                builder
            }
            None => PlaybackProgramBuilder::new(),
        };
        trace!(elapsed = ?timer.elapsed(), "generated schedule-out replacement");

        if program.programs.len() > 1 && self.info.is_quiggeldy && program.has_hooks_around_realtime {
            warn!(
                connection = %self.info.unique_identifier,
                "shared connection runs several programs back to back with pre or post realtime \
                 hooks; their contiguity cannot be guaranteed"
            );
        }

        let mut get_state_builder = PlaybackProgramBuilder::new();
        let get_state = (self.enable_differential_config && program.ppu_symbols.is_some())
            .then(|| GetState::generate(&mut get_state_builder, true));
        let get_state_programs: Vec<PlaybackProgram> = get_state_builder
            .split(self.info.playback_memory_size)
            .into_iter()
            .map(|mut b| b.done())
            .collect();

        let trigger = match &program.ppu_symbols {
            Some(symbols) => generator::ppu_start(symbols, &self.params)?,
            None => PlaybackProgramBuilder::new(),
        };

        let executed = if self.enable_differential_config {
            let mut connection = self.connection.lock();
            let connection = connection.as_mut().ok_or(BackendError::ConnectionReleased)?;
            let mut configs = self.config.lock();
            let config = configs
                .entry(chip)
                .or_insert_with(|| StatefulConnectionConfig::new(true));
            let prepared = self.prepare(config, program, &initial);
            let executed = self.execute(
                connection.as_mut(),
                program,
                prepared,
                schedule_out_replacement,
                trigger,
                get_state_programs,
            );
            Self::update_state(config, program, get_state.as_ref(), &executed);
            executed
        } else {
            if self.is_released() {
                return Err(BackendError::ConnectionReleased);
            }
            let prepared = {
                let mut configs = self.config.lock();
                let config = configs
                    .entry(chip)
                    .or_insert_with(|| StatefulConnectionConfig::new(false));
                self.prepare(config, program, &initial)
            };
            let executed = {
                let mut connection = self.connection.lock();
                let connection = connection.as_mut().ok_or(BackendError::ConnectionReleased)?;
                self.execute(
                    connection.as_mut(),
                    program,
                    prepared,
                    schedule_out_replacement,
                    trigger,
                    get_state_programs,
                )
            };
            let mut configs = self.config.lock();
            if let Some(config) = configs.get_mut(&chip) {
                Self::update_state(config, program, get_state.as_ref(), &executed);
            }
            executed
        };

        let Executed {
            duration,
            mut failures,
            total,
        } = executed;
        if failures.is_empty() {
            return Ok(duration);
        }
        let failed = failures.len();
        Err(BackendError::RunFailed {
            failed,
            total,
            source: Box::new(failures.swap_remove(0)),
        })
    }

    fn prepare(
        &self,
        config: &mut StatefulConnectionConfig,
        program: &mut ChipProgram,
        initial: &Chip,
    ) -> Prepared {
        let timer = Instant::now();
        let is_fresh = config.is_fresh();
        config.set_chip(initial, true);
        if let Some(dram) = &program.external_ppu_dram_memory_config {
            config.set_external_dram(Some(dram));
        }

        let has_hook = !program.pre_initial_config_hook.is_empty();
        let enforce_base = !self.enable_differential_config || is_fresh || has_hook;
        let has_capmem_changes = enforce_base || config.differential_changes_capmem();
        let nothing_changed = self.enable_differential_config
            && !is_fresh
            && !config.has_differential()
            && !has_hook;

        let mut base = std::mem::take(&mut program.pre_initial_config_hook);
        let mut differential = PlaybackProgramBuilder::new();
        if !nothing_changed {
            base.write_all(config.base());
            if config.has_differential() {
                differential.write_all(config.differential());
            }
        }
        trace!(
            elapsed = ?timer.elapsed(),
            base = base.len(),
            differential = differential.len(),
            "generated initial configuration"
        );
        Prepared {
            base,
            differential,
            enforce_base,
            has_capmem_changes,
            nothing_changed,
        }
    }

    fn execute(
        &self,
        connection: &mut dyn Connection,
        program: &mut ChipProgram,
        prepared: Prepared,
        schedule_out_replacement: PlaybackProgramBuilder,
        trigger: PlaybackProgramBuilder,
        mut get_state_programs: Vec<PlaybackProgram>,
    ) -> Executed {
        let chip = program.chip;
        let total = program.programs.len() + get_state_programs.len();
        if program.programs.is_empty() && prepared.base.is_empty() {
            return Executed {
                duration: Duration::ZERO,
                failures: Vec::new(),
                total,
            };
        }

        let timer = Instant::now();
        let before = connection.time_info().execution_duration;
        let stack = connection.reinit_stack();
        if !prepared.nothing_changed {
            let enforce_differential = !prepared.differential.is_empty();
            stack.set(
                chip,
                ReinitSlot::BaseConfig,
                ReinitEntry::new(prepared.base, prepared.enforce_base),
            );
            stack.set(
                chip,
                ReinitSlot::DifferentialConfig,
                ReinitEntry::new(prepared.differential, enforce_differential),
            );
        }
        stack.set(
            chip,
            ReinitSlot::ScheduleOutReplacement,
            ReinitEntry::snapshot(schedule_out_replacement),
        );
        stack.set(
            chip,
            ReinitSlot::CapmemSettlingWait,
            ReinitEntry::new(
                generator::capmem_settling_wait(&self.params),
                prepared.has_capmem_changes,
            ),
        );
        let enforce_trigger = !trigger.is_empty();
        stack.set(chip, ReinitSlot::PpuStart, ReinitEntry::new(trigger, enforce_trigger));

        let mut failures = Vec::new();
        let programs = program.programs.iter_mut().chain(get_state_programs.iter_mut());
        for p in programs {
            if let Err(err) = connection.run(chip, p) {
                error!(%chip, error = %err, "run of playback program not successful");
                failures.push(err);
            }
        }

        let after = connection.time_info().execution_duration;
        *self.time_info.lock() = connection.time_info();
        trace!(elapsed = ?timer.elapsed(), programs = total, "executed playback programs");
        Executed {
            duration: after.saturating_sub(before),
            failures,
            total,
        }
    }

    fn update_state(
        config: &mut StatefulConnectionConfig,
        program: &ChipProgram,
        get_state: Option<&GetState>,
        executed: &Executed,
    ) {
        if !executed.failures.is_empty() {
            config.reset();
            return;
        }
        if program.chip_configs.len() <= 1 && program.ppu_symbols.is_none() {
            return;
        }
        let Some(mut current) = program.final_config().cloned() else {
            return;
        };
        if let Some(get_state) = get_state {
            if let Err(err) = get_state.apply(&mut current) {
                error!(error = %err, "read-back of PPU state incomplete, resetting tracked state");
                config.reset();
                return;
            }
        }
        config.set_chip(&current, false);
    }
}
