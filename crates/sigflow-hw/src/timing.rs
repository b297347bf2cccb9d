//! Hardware timing constants.
//!
//! The periodic-CADC constants compensate the clock-domain crossing between
//! FPGA and PPU. They are specific to one hardware revision and are therefore
//! supplied by configuration rather than derived.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::time::FpgaTime;

/// Timing parameters of the hardware generation driven.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareParameters {
    /// Membrane settling wait before a realtime interval.
    pub wait_before_realtime: FpgaTime,
    /// Wait after a realtime interval before readout.
    pub wait_after_realtime: FpgaTime,
    /// FPGA cycles the PPU timestamp leads the FPGA timer by.
    pub periodic_cadc_fpga_wait_clock_cycles: u32,
    /// PPU cycles waited before the first periodic sample.
    pub periodic_cadc_ppu_wait_clock_cycles: u32,
    /// Periodic CADC samples fitting into the sample buffer.
    pub num_cadc_samples_in_extmem: usize,
    /// Lower bound of the duration of one periodic CADC sample.
    pub approx_cadc_sample_duration: Duration,
    /// Instruction timeout while waiting for the PPU scheduler to finish.
    pub ppu_finish_timeout: FpgaTime,
    /// Instruction timeout restored after polling.
    pub default_instruction_timeout: FpgaTime,
    /// Settling time after analog bias changes.
    pub capmem_settling_time: Duration,
    /// Whether CADC reads subtract a baseline taken before the realtime interval.
    pub enable_cadc_baseline: bool,
}

impl Default for HardwareParameters {
    fn default() -> Self {
        Self {
            wait_before_realtime: FpgaTime::from_us(1),
            wait_after_realtime: FpgaTime::from_us(1),
            periodic_cadc_fpga_wait_clock_cycles: 1000,
            periodic_cadc_ppu_wait_clock_cycles: 2000,
            num_cadc_samples_in_extmem: 100,
            approx_cadc_sample_duration: Duration::from_nanos(1700),
            ppu_finish_timeout: FpgaTime::from_us(100_000),
            default_instruction_timeout: FpgaTime::from_us(10_000),
            capmem_settling_time: Duration::from_millis(100),
            enable_cadc_baseline: true,
        }
    }
}

impl HardwareParameters {
    /// Estimated number of periodic CADC samples taken during `duration`.
    ///
    /// Uses the sample duration as a lower bound of the sample period, so the
    /// estimate is conservative (never below the true count).
    pub fn estimate_periodic_cadc_samples(&self, duration: FpgaTime) -> usize {
        let ppu_wait = u64::from(self.periodic_cadc_ppu_wait_clock_cycles) / 2;
        let total = (duration.value() + u64::from(self.periodic_cadc_fpga_wait_clock_cycles))
            .saturating_sub(ppu_wait);
        let per_sample = FpgaTime::from_duration(self.approx_cadc_sample_duration)
            .value()
            .max(1);
        usize::try_from(total / per_sample + 1).unwrap_or(usize::MAX)
    }
}
