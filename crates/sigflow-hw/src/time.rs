//! Clock-domain time units.
//!
//! The FPGA runs at 125 MHz; one [`FpgaTime`] tick is 8 ns. The on-chip
//! processor counts at twice that rate, so PPU timestamps are halved when
//! converted into FPGA cycles.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// FPGA clock cycles per microsecond.
pub const FPGA_CLOCK_CYCLES_PER_US: u64 = 125;

/// PPU clock cycles per FPGA clock cycle.
pub const PPU_CLOCK_CYCLES_PER_FPGA_CYCLE: u64 = 2;

/// Time in FPGA clock cycles.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FpgaTime(pub u64);

impl FpgaTime {
    /// Zero cycles.
    pub const ZERO: FpgaTime = FpgaTime(0);

    /// Largest representable time.
    pub const MAX: FpgaTime = FpgaTime(u64::MAX);

    /// Converts microseconds into cycles.
    pub const fn from_us(us: u64) -> Self {
        Self(us * FPGA_CLOCK_CYCLES_PER_US)
    }

    /// Converts a wall duration into cycles, truncating sub-cycle remainders.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_duration(duration: Duration) -> Self {
        Self((duration.as_nanos() * u128::from(FPGA_CLOCK_CYCLES_PER_US) / 1000) as u64)
    }

    /// Converts a PPU timestamp into FPGA cycles.
    pub const fn from_ppu_cycles(ppu: u64) -> Self {
        Self(ppu / PPU_CLOCK_CYCLES_PER_FPGA_CYCLE)
    }

    /// Raw cycle count.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Whole microseconds.
    pub const fn as_us(self) -> u64 {
        self.0 / FPGA_CLOCK_CYCLES_PER_US
    }

    /// Wall duration of this many cycles.
    pub const fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0 * 1000 / FPGA_CLOCK_CYCLES_PER_US)
    }

    /// Subtraction clamped at zero.
    pub const fn saturating_sub(self, other: FpgaTime) -> FpgaTime {
        FpgaTime(self.0.saturating_sub(other.0))
    }

    /// Checked subtraction.
    pub const fn checked_sub(self, other: FpgaTime) -> Option<FpgaTime> {
        match self.0.checked_sub(other.0) {
            Some(v) => Some(FpgaTime(v)),
            None => None,
        }
    }
}

impl Add for FpgaTime {
    type Output = FpgaTime;

    fn add(self, rhs: FpgaTime) -> FpgaTime {
        FpgaTime(self.0 + rhs.0)
    }
}

impl AddAssign for FpgaTime {
    fn add_assign(&mut self, rhs: FpgaTime) {
        self.0 += rhs.0;
    }
}

impl Sub for FpgaTime {
    type Output = FpgaTime;

    fn sub(self, rhs: FpgaTime) -> FpgaTime {
        FpgaTime(self.0 - rhs.0)
    }
}

impl SubAssign for FpgaTime {
    fn sub_assign(&mut self, rhs: FpgaTime) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for FpgaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cycles", self.0)
    }
}

/// On-chip event timestamp in FPGA cycles, as stamped by the chip itself.
///
/// Chip time and FPGA time share the clock but are reset independently.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChipTime(pub u64);

impl ChipTime {
    /// Raw cycle count.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<FpgaTime> for ChipTime {
    fn from(t: FpgaTime) -> Self {
        ChipTime(t.0)
    }
}
