//! Typed chip coordinates.
//!
//! Every on-chip entity is addressed by a small ranged newtype. Values are
//! validated on construction so that an in-range invariant holds everywhere
//! else: [`new`](NeuronColumn::new) panics on out-of-range values and is
//! meant for literals, [`try_new`](NeuronColumn::try_new) returns an error
//! for data coming from outside.
//!
//! # Routing topology
//!
//! ```text
//!  neuron ─► NeuronEventOutput (8) ─┐
//!  L2 input channel (4) ────────────┼─► CrossbarInput (20)
//!  background source (8) ───────────┘          │ CrossbarNode (mask/target)
//!                                              ▼
//!                         CrossbarOutput (12) = padi bus (8) | L2 output (4)
//!                                              │
//!                   PadiBus ─► SynapseDriver (driver % 4 == bus) ─► 2 SynapseRows
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HardwareError, Result};

macro_rules! ranged_coordinate {
    ($(#[$meta:meta])* $name:ident, $repr:ty, $size:expr) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(try_from = "usize", into = "usize")]
        pub struct $name($repr);

        #[allow(clippy::cast_possible_truncation)]
        impl $name {
            /// Number of valid values.
            pub const SIZE: usize = $size;

            /// Creates the coordinate.
            ///
            /// # Panics
            ///
            /// Panics if `value >= SIZE`.
            pub const fn new(value: usize) -> Self {
                assert!(value < Self::SIZE, "coordinate out of range");
                Self(value as $repr)
            }

            /// Creates the coordinate, rejecting out-of-range values.
            pub fn try_new(value: usize) -> Result<Self> {
                if value < Self::SIZE {
                    Ok(Self(value as $repr))
                } else {
                    Err(HardwareError::CoordinateOutOfRange {
                        kind: stringify!($name),
                        value,
                        size: Self::SIZE,
                    })
                }
            }

            /// Returns the raw index.
            #[inline]
            pub const fn value(self) -> usize {
                self.0 as usize
            }

            /// Iterates all valid values in ascending order.
            pub fn iter_all() -> impl Iterator<Item = Self> {
                (0..Self::SIZE).map(|v| Self(v as $repr))
            }
        }

        impl TryFrom<usize> for $name {
            type Error = HardwareError;

            fn try_from(value: usize) -> Result<Self> {
                Self::try_new(value)
            }
        }

        impl From<$name> for usize {
            fn from(value: $name) -> usize {
                value.value()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

/// Half of the chip: each hemisphere owns a synapse matrix, a neuron row,
/// a CADC and a PPU.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Hemisphere {
    /// Upper hemisphere (index 0).
    #[default]
    Top,
    /// Lower hemisphere (index 1).
    Bottom,
}

impl Hemisphere {
    /// Number of hemispheres.
    pub const SIZE: usize = 2;

    /// Both hemispheres, top first.
    pub const ALL: [Hemisphere; 2] = [Hemisphere::Top, Hemisphere::Bottom];

    /// Index of the hemisphere (top = 0).
    #[inline]
    pub const fn value(self) -> usize {
        match self {
            Hemisphere::Top => 0,
            Hemisphere::Bottom => 1,
        }
    }

    /// Hemisphere from index, `None` for values ≥ 2.
    pub const fn from_value(value: usize) -> Option<Self> {
        match value {
            0 => Some(Hemisphere::Top),
            1 => Some(Hemisphere::Bottom),
            _ => None,
        }
    }

    /// Iterates both hemispheres.
    pub fn iter_all() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter()
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hemisphere::Top => f.write_str("top"),
            Hemisphere::Bottom => f.write_str("bottom"),
        }
    }
}

ranged_coordinate!(
    /// Neuron (and synapse) column within one hemisphere.
    NeuronColumn,
    u16,
    256
);

ranged_coordinate!(
    /// Synapse row within one hemisphere's synapse matrix.
    SynapseRow,
    u16,
    256
);

ranged_coordinate!(
    /// Synapse driver within one hemisphere. Each driver feeds two rows.
    SynapseDriverOnHemisphere,
    u8,
    128
);

ranged_coordinate!(
    /// PADI bus within one hemisphere.
    PadiBusOnHemisphere,
    u8,
    4
);

ranged_coordinate!(
    /// Neuron event output block; 64 consecutive columns share one.
    NeuronEventOutput,
    u8,
    8
);

ranged_coordinate!(
    /// Crossbar input: 8 neuron event outputs, 4 L2 inputs, 8 background sources.
    CrossbarInput,
    u8,
    20
);

ranged_coordinate!(
    /// Crossbar output: 8 PADI busses followed by 4 L2 outputs.
    CrossbarOutput,
    u8,
    12
);

ranged_coordinate!(
    /// Background spike source.
    BackgroundSpikeSourceOnDls,
    u8,
    8
);

ranged_coordinate!(
    /// FPGA-side L2 channel.
    L2Channel,
    u8,
    4
);

impl NeuronColumn {
    /// Event output block this column sends its spikes to on `hemisphere`.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn event_output(self, hemisphere: Hemisphere) -> NeuronEventOutput {
        NeuronEventOutput((hemisphere.value() * 4 + self.value() / 64) as u8)
    }
}

impl SynapseRow {
    /// Driver feeding this row.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn driver(self) -> SynapseDriverOnHemisphere {
        SynapseDriverOnHemisphere((self.0 / 2) as u8)
    }

    /// Even rows are driven excitatory, odd rows inhibitory by default.
    pub const fn is_excitatory(self) -> bool {
        self.0 % 2 == 0
    }
}

impl SynapseDriverOnHemisphere {
    /// PADI bus the driver listens on.
    pub const fn padi_bus(self) -> PadiBusOnHemisphere {
        PadiBusOnHemisphere(self.0 % 4)
    }

    /// The two rows fed by this driver.
    pub const fn rows(self) -> [SynapseRow; 2] {
        let first = self.0 as u16 * 2;
        [SynapseRow(first), SynapseRow(first + 1)]
    }
}

impl NeuronEventOutput {
    /// Crossbar input fed by this event output.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn crossbar_input(self) -> CrossbarInput {
        CrossbarInput(self.0)
    }

    /// Hemisphere of the neurons sending to this output.
    pub const fn hemisphere(self) -> Hemisphere {
        if self.0 < 4 {
            Hemisphere::Top
        } else {
            Hemisphere::Bottom
        }
    }
}

impl CrossbarInput {
    /// First index of the L2 input range.
    pub const L2_BEGIN: usize = 8;
    /// First index of the background source range.
    pub const BACKGROUND_BEGIN: usize = 12;

    /// Crossbar input driven by L2 input channel `channel`.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_l2(channel: L2Channel) -> Self {
        Self((Self::L2_BEGIN + channel.value()) as u8)
    }

    /// L2 channel, if this input is fed from the FPGA.
    pub fn l2_channel(self) -> Option<L2Channel> {
        let v = self.value();
        (Self::L2_BEGIN..Self::BACKGROUND_BEGIN)
            .contains(&v)
            .then(|| L2Channel::new(v - Self::L2_BEGIN))
    }

    /// Neuron event output, if this input is fed from neurons.
    pub fn event_output(self) -> Option<NeuronEventOutput> {
        (self.value() < Self::L2_BEGIN).then(|| NeuronEventOutput::new(self.value()))
    }

    /// Background source, if this input is fed from one.
    pub fn background_source(self) -> Option<BackgroundSpikeSourceOnDls> {
        let v = self.value();
        (v >= Self::BACKGROUND_BEGIN)
            .then(|| BackgroundSpikeSourceOnDls::new(v - Self::BACKGROUND_BEGIN))
    }
}

impl CrossbarOutput {
    /// First index of the L2 output range.
    pub const L2_BEGIN: usize = 8;

    /// Crossbar output forwarding to L2 channel `channel`.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_l2(channel: L2Channel) -> Self {
        Self((Self::L2_BEGIN + channel.value()) as u8)
    }

    /// L2 channel, if this output forwards to the FPGA.
    pub fn l2_channel(self) -> Option<L2Channel> {
        let v = self.value();
        (v >= Self::L2_BEGIN).then(|| L2Channel::new(v - Self::L2_BEGIN))
    }

    /// PADI bus, if this output drives one.
    pub fn padi_bus(self) -> Option<PadiBusOnDls> {
        let v = self.value();
        (v < Self::L2_BEGIN).then(|| PadiBusOnDls {
            hemisphere: if v < 4 {
                Hemisphere::Top
            } else {
                Hemisphere::Bottom
            },
            bus: PadiBusOnHemisphere::new(v % 4),
        })
    }
}

impl BackgroundSpikeSourceOnDls {
    /// Crossbar input driven by this source.
    pub const fn crossbar_input(self) -> CrossbarInput {
        CrossbarInput::new(CrossbarInput::BACKGROUND_BEGIN + self.value())
    }
}

/// Synapse driver with hemisphere.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SynapseDriverOnDls {
    /// Hemisphere of the driver.
    pub hemisphere: Hemisphere,
    /// Driver index.
    pub driver: SynapseDriverOnHemisphere,
}

impl SynapseDriverOnDls {
    /// Creates the coordinate.
    pub const fn new(hemisphere: Hemisphere, driver: SynapseDriverOnHemisphere) -> Self {
        Self { hemisphere, driver }
    }

    /// PADI bus this driver listens on.
    pub const fn padi_bus(self) -> PadiBusOnDls {
        PadiBusOnDls {
            hemisphere: self.hemisphere,
            bus: self.driver.padi_bus(),
        }
    }

    /// Linear index over both hemispheres.
    pub const fn index(self) -> usize {
        self.hemisphere.value() * SynapseDriverOnHemisphere::SIZE + self.driver.value()
    }
}

/// PADI bus with hemisphere.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PadiBusOnDls {
    /// Hemisphere of the bus.
    pub hemisphere: Hemisphere,
    /// Bus index within the hemisphere.
    pub bus: PadiBusOnHemisphere,
}

impl PadiBusOnDls {
    /// Creates the coordinate.
    pub const fn new(hemisphere: Hemisphere, bus: PadiBusOnHemisphere) -> Self {
        Self { hemisphere, bus }
    }

    /// Crossbar output driving this bus.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn crossbar_output(self) -> CrossbarOutput {
        CrossbarOutput((self.hemisphere.value() * 4 + self.bus.value()) as u8)
    }

    /// Linear index over both hemispheres.
    pub const fn index(self) -> usize {
        self.hemisphere.value() * PadiBusOnHemisphere::SIZE + self.bus.value()
    }
}

/// Single neuron circuit.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AtomicNeuron {
    /// Neuron row.
    pub hemisphere: Hemisphere,
    /// Column within the row.
    pub column: NeuronColumn,
}

impl AtomicNeuron {
    /// Creates the coordinate.
    pub const fn new(hemisphere: Hemisphere, column: NeuronColumn) -> Self {
        Self { hemisphere, column }
    }

    /// Event output block of this neuron.
    pub const fn event_output(self) -> NeuronEventOutput {
        self.column.event_output(self.hemisphere)
    }

    /// Linear index over both hemispheres.
    pub const fn index(self) -> usize {
        self.hemisphere.value() * NeuronColumn::SIZE + self.column.value()
    }
}

/// Crossbar node between one input and one output.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CrossbarNodeOnDls {
    /// Input of the node.
    pub input: CrossbarInput,
    /// Output of the node.
    pub output: CrossbarOutput,
}

impl CrossbarNodeOnDls {
    /// Number of crossbar nodes.
    pub const SIZE: usize = CrossbarInput::SIZE * CrossbarOutput::SIZE;

    /// Creates the coordinate.
    pub const fn new(input: CrossbarInput, output: CrossbarOutput) -> Self {
        Self { input, output }
    }

    /// Linear index, output major.
    pub const fn index(self) -> usize {
        self.output.value() * CrossbarInput::SIZE + self.input.value()
    }

    /// Inverse of [`index`](Self::index).
    pub const fn from_index(index: usize) -> Self {
        Self {
            input: CrossbarInput::new(index % CrossbarInput::SIZE),
            output: CrossbarOutput::new(index / CrossbarInput::SIZE),
        }
    }

    /// Iterates all nodes in index order.
    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..Self::SIZE).map(Self::from_index)
    }
}

impl fmt::Display for CrossbarNodeOnDls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CrossbarNode({} → {})", self.input.value(), self.output.value())
    }
}

/// Chip index on one connection.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChipOnConnection(pub u32);

/// Connection index on the executor.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionOnExecutor(pub u32);

/// Chip placement: which connection, which chip behind it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChipOnExecutor {
    /// Connection the chip is reached through.
    pub connection: ConnectionOnExecutor,
    /// Chip on that connection.
    pub chip: ChipOnConnection,
}

impl ChipOnExecutor {
    /// Creates the placement.
    pub const fn new(connection: ConnectionOnExecutor, chip: ChipOnConnection) -> Self {
        Self { connection, chip }
    }
}

impl fmt::Display for ChipOnConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chip {}", self.0)
    }
}

impl fmt::Display for ConnectionOnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection {}", self.0)
    }
}

impl fmt::Display for ChipOnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.chip)
    }
}
