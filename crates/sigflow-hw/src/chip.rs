//! Static chip configuration image.
//!
//! [`Chip`] holds every statically configurable container of one chip. It
//! encodes into a flat list of `(Address, Word)` writes ordered by region
//! and accepts single-word writes back, which is how both the differential
//! tracker compares images and the simulated backend keeps its register
//! file.
//!
//! # Encoding
//!
//! Each container maps onto one or more words at a fixed location. The
//! location table ([`Location`]) is the single source of truth: encoding
//! walks it in order, decoding resolves an address into it.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::address::{self, Address, Word, map};
use crate::coord::{
    AtomicNeuron, BackgroundSpikeSourceOnDls, CrossbarNodeOnDls, CrossbarOutput, Hemisphere,
    NeuronColumn, NeuronEventOutput, PadiBusOnDls, SynapseDriverOnDls,
};
use crate::error::{HardwareError, Result};

/// Number of words in one PPU's internal memory.
pub const PPU_MEMORY_WORDS: usize = 4096;

/// Size of the PPU external memory in bytes.
pub const EXTERNAL_PPU_MEMORY_BYTES: usize = 64 * 1024;

/// Size of the FPGA-side DRAM reachable by the PPUs in bytes.
pub const EXTERNAL_DRAM_BYTES: usize = 16 << 20;

/// Analog signal routed to the readout chain of a neuron.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReadoutSource {
    /// Membrane potential.
    #[default]
    Membrane,
    /// Excitatory synaptic input current.
    ExcitatorySynapticInput,
    /// Inhibitory synaptic input current.
    InhibitorySynapticInput,
    /// Adaptation state.
    Adaptation,
}

impl ReadoutSource {
    const fn bits(self) -> u32 {
        match self {
            ReadoutSource::Membrane => 0,
            ReadoutSource::ExcitatorySynapticInput => 1,
            ReadoutSource::InhibitorySynapticInput => 2,
            ReadoutSource::Adaptation => 3,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => ReadoutSource::Membrane,
            1 => ReadoutSource::ExcitatorySynapticInput,
            2 => ReadoutSource::InhibitorySynapticInput,
            _ => ReadoutSource::Adaptation,
        }
    }
}

/// Configuration of one neuron circuit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronConfig {
    /// Threshold comparator enabled.
    pub enable_fire: bool,
    /// Excitatory synaptic input connected.
    pub enable_excitatory_input: bool,
    /// Inhibitory synaptic input connected.
    pub enable_inhibitory_input: bool,
    /// Spikes are sent to the event output with [`address_out`](Self::address_out).
    pub enable_address_out: bool,
    /// Readout amplifier connected.
    pub enable_readout: bool,
    /// Signal presented to the readout chain.
    pub readout_source: ReadoutSource,
    /// Membrane threshold in CADC units.
    pub threshold: i8,
    /// 14-bit label sent with every spike.
    pub address_out: u16,
}

impl NeuronConfig {
    #[allow(clippy::cast_sign_loss)]
    fn to_word(self) -> Word {
        Word(
            u32::from(self.enable_fire)
                | u32::from(self.enable_excitatory_input) << 1
                | u32::from(self.enable_inhibitory_input) << 2
                | u32::from(self.enable_address_out) << 3
                | u32::from(self.enable_readout) << 4
                | self.readout_source.bits() << 5
                | u32::from(self.threshold as u8) << 8
                | u32::from(self.address_out & 0x3fff) << 16,
        )
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn from_word(word: Word) -> Self {
        Self {
            enable_fire: word.bit(0),
            enable_excitatory_input: word.bit(1),
            enable_inhibitory_input: word.bit(2),
            enable_address_out: word.bit(3),
            enable_readout: word.bit(4),
            readout_source: ReadoutSource::from_bits(word.field(5, 2)),
            threshold: word.field(8, 8) as u8 as i8,
            address_out: word.field(16, 14) as u16,
        }
    }
}

/// Sign of the synaptic current a synapse row produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowMode {
    /// Row is switched off.
    #[default]
    Disabled,
    /// Row drives the excitatory input.
    Excitatory,
    /// Row drives the inhibitory input.
    Inhibitory,
    /// Row drives both inputs.
    ExcitatoryAndInhibitory,
}

impl RowMode {
    const fn bits(self) -> u32 {
        match self {
            RowMode::Disabled => 0,
            RowMode::Excitatory => 1,
            RowMode::Inhibitory => 2,
            RowMode::ExcitatoryAndInhibitory => 3,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => RowMode::Disabled,
            1 => RowMode::Excitatory,
            2 => RowMode::Inhibitory,
            _ => RowMode::ExcitatoryAndInhibitory,
        }
    }

    /// Sign applied to weights of this row: +1, -1 or 0.
    pub const fn sign(self) -> i32 {
        match self {
            RowMode::Disabled | RowMode::ExcitatoryAndInhibitory => 0,
            RowMode::Excitatory => 1,
            RowMode::Inhibitory => -1,
        }
    }
}

/// Configuration of one synapse driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynapseDriverConfig {
    /// Events from the PADI bus are accepted.
    pub enable_receiver: bool,
    /// Mode of the lower-index (even) row.
    pub row_mode_top: RowMode,
    /// Mode of the higher-index (odd) row.
    pub row_mode_bottom: RowMode,
    /// Bits of the row select address compared against the driver index.
    pub row_address_compare_mask: u8,
    /// Forward the label's synapse address to the rows.
    pub enable_address_out: bool,
}

impl SynapseDriverConfig {
    fn to_word(self) -> Word {
        Word(
            u32::from(self.enable_receiver)
                | self.row_mode_top.bits() << 1
                | self.row_mode_bottom.bits() << 3
                | u32::from(self.enable_address_out) << 5
                | u32::from(self.row_address_compare_mask & 0x1f) << 8,
        )
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_word(word: Word) -> Self {
        Self {
            enable_receiver: word.bit(0),
            row_mode_top: RowMode::from_bits(word.field(1, 2)),
            row_mode_bottom: RowMode::from_bits(word.field(3, 2)),
            enable_address_out: word.bit(5),
            row_address_compare_mask: word.field(8, 5) as u8,
        }
    }

    /// Whether a row select address reaches this driver.
    pub fn accepts(&self, driver: SynapseDriverOnDls, row_select: u8) -> bool {
        #[allow(clippy::cast_possible_truncation)]
        let own = (driver.driver.value() / 4) as u8;
        self.enable_receiver && (row_select ^ own) & self.row_address_compare_mask == 0
    }
}

/// Configuration of one PADI bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadiBusConfig {
    /// Crossbar events are forwarded onto the bus.
    pub enable_spl1: bool,
}

/// Configuration of one crossbar node.
///
/// An event with label `l` passes iff `l & mask == target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossbarNodeConfig {
    /// Label bits compared.
    pub mask: u16,
    /// Expected value of the compared bits.
    pub target: u16,
    /// Count events dropped at this node.
    pub enable_drop_counter: bool,
}

impl CrossbarNodeConfig {
    /// Node configuration that never forwards any event.
    pub const DROP_ALL: CrossbarNodeConfig = CrossbarNodeConfig {
        mask: 0,
        target: 1,
        enable_drop_counter: false,
    };

    /// Node configuration forwarding every event.
    pub const PASS_ALL: CrossbarNodeConfig = CrossbarNodeConfig {
        mask: 0,
        target: 0,
        enable_drop_counter: false,
    };

    /// Whether an event with this neuron label passes the node.
    pub const fn matches(&self, label: u16) -> bool {
        label & self.mask == self.target
    }

    fn to_word(self) -> Word {
        Word(
            u32::from(self.mask & 0x3fff)
                | u32::from(self.target & 0x3fff) << 14
                | u32::from(self.enable_drop_counter) << 28,
        )
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_word(word: Word) -> Self {
        Self {
            mask: word.field(0, 14) as u16,
            target: word.field(14, 14) as u16,
            enable_drop_counter: word.bit(28),
        }
    }
}

impl Default for CrossbarNodeConfig {
    fn default() -> Self {
        Self::DROP_ALL
    }
}

/// Configuration of one crossbar output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossbarOutputConfig {
    /// Count events leaving through this output.
    pub enable_event_counter: bool,
}

/// Configuration of one background spike source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundSpikeSourceConfig {
    /// Source emits events.
    pub enable: bool,
    /// Poisson mode instead of regular spiking.
    pub enable_random: bool,
    /// Cycles between events in regular mode.
    pub period: u16,
    /// Firing probability per period in Poisson mode (out of 256).
    pub rate: u8,
    /// Seed of the pseudo-random generator.
    pub seed: u32,
    /// Label of emitted events.
    pub neuron_label: u16,
    /// Label bits randomized in Poisson mode.
    pub mask: u8,
}

impl BackgroundSpikeSourceConfig {
    const WORDS: usize = 3;

    fn to_words(self) -> [Word; 3] {
        [
            Word(
                u32::from(self.enable)
                    | u32::from(self.enable_random) << 1
                    | u32::from(self.rate) << 8
                    | u32::from(self.period) << 16,
            ),
            Word(u32::from(self.neuron_label) | u32::from(self.mask) << 16),
            Word(self.seed),
        ]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_word(&mut self, index: usize, word: Word) {
        match index {
            0 => {
                self.enable = word.bit(0);
                self.enable_random = word.bit(1);
                self.rate = word.field(8, 8) as u8;
                self.period = word.field(16, 16) as u16;
            }
            1 => {
                self.neuron_label = word.field(0, 16) as u16;
                self.mask = word.field(16, 8) as u8;
            }
            _ => self.seed = word.0,
        }
    }
}

/// MADC readout chain configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MadcConfig {
    /// Neuron connected to each of the two input channels.
    pub sources: [Option<AtomicNeuron>; 2],
    /// Channel sampled first.
    pub initial_channel: u8,
    /// Samples between channel switches, 0 to never switch.
    pub switch_period: u16,
    /// FPGA cycles between two samples.
    pub sample_period: u16,
    /// Samples taken after start, 0 to sample until stopped.
    pub number_of_samples: u32,
}

impl Default for MadcConfig {
    fn default() -> Self {
        Self {
            sources: [None, None],
            initial_channel: 0,
            switch_period: 0,
            sample_period: 4,
            number_of_samples: 0,
        }
    }
}

impl MadcConfig {
    const WORDS: usize = 5;

    #[allow(clippy::cast_possible_truncation)]
    fn source_word(source: Option<AtomicNeuron>) -> Word {
        source.map_or(Word(0), |n| Word(1 << 31 | n.index() as u32))
    }

    fn source_from_word(word: Word) -> Option<AtomicNeuron> {
        word.bit(31).then(|| {
            let index = word.field(0, 9) as usize;
            let hemisphere = if index < NeuronColumn::SIZE {
                Hemisphere::Top
            } else {
                Hemisphere::Bottom
            };
            AtomicNeuron::new(hemisphere, NeuronColumn::new(index % NeuronColumn::SIZE))
        })
    }

    fn to_words(self) -> [Word; 5] {
        [
            Word(u32::from(self.sample_period) | u32::from(self.switch_period) << 16),
            Word(u32::from(self.initial_channel & 1)),
            Self::source_word(self.sources[0]),
            Self::source_word(self.sources[1]),
            Word(self.number_of_samples),
        ]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_word(&mut self, index: usize, word: Word) {
        match index {
            0 => {
                self.sample_period = word.field(0, 16) as u16;
                self.switch_period = word.field(16, 16) as u16;
            }
            1 => self.initial_channel = (word.0 & 1) as u8,
            2 => self.sources[0] = Self::source_from_word(word),
            3 => self.sources[1] = Self::source_from_word(word),
            _ => self.number_of_samples = word.0,
        }
    }
}

/// CADC configuration of one hemisphere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadcConfig {
    /// Converter enabled.
    pub enable: bool,
    /// Cycles waited after reset before conversion.
    pub reset_wait: u8,
    /// Cycles between conversions.
    pub dead_time: u8,
}

impl CadcConfig {
    fn to_word(self) -> Word {
        Word(u32::from(self.enable) | u32::from(self.reset_wait) << 8 | u32::from(self.dead_time) << 16)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_word(word: Word) -> Self {
        Self {
            enable: word.bit(0),
            reset_wait: word.field(8, 8) as u8,
            dead_time: word.field(16, 8) as u8,
        }
    }
}

/// Synapse matrix of one hemisphere: 6-bit weight and 6-bit label per synapse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynapseMatrix {
    weights: Vec<u8>,
    labels: Vec<u8>,
}

impl Default for SynapseMatrix {
    fn default() -> Self {
        Self {
            weights: vec![0; Self::SIZE],
            labels: vec![0; Self::SIZE],
        }
    }
}

impl SynapseMatrix {
    /// Number of synapses.
    pub const SIZE: usize = 256 * 256;
    /// Largest weight value.
    pub const MAX_WEIGHT: u8 = 63;
    /// Largest label value.
    pub const MAX_LABEL: u8 = 63;

    /// Weight at `(row, column)`.
    pub fn weight(&self, row: usize, column: usize) -> u8 {
        self.weights[row * 256 + column]
    }

    /// Label at `(row, column)`.
    pub fn label(&self, row: usize, column: usize) -> u8 {
        self.labels[row * 256 + column]
    }

    /// Sets weight at `(row, column)`, clamped to 6 bits.
    pub fn set_weight(&mut self, row: usize, column: usize, weight: u8) {
        self.weights[row * 256 + column] = weight.min(Self::MAX_WEIGHT);
    }

    /// Sets label at `(row, column)`, clamped to 6 bits.
    pub fn set_label(&mut self, row: usize, column: usize, label: u8) {
        self.labels[row * 256 + column] = label.min(Self::MAX_LABEL);
    }

    fn to_word(&self, index: usize) -> Word {
        let first = index * 2;
        let half = |i: usize| u32::from(self.weights[i]) | u32::from(self.labels[i]) << 6;
        Word(half(first) | half(first + 1) << 16)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_word(&mut self, index: usize, word: Word) {
        let first = index * 2;
        for (i, shift) in [(first, 0), (first + 1, 16)] {
            self.weights[i] = word.field(shift, 6) as u8;
            self.labels[i] = word.field(shift + 6, 6) as u8;
        }
    }
}

/// Analog bias cells of one hemisphere.
///
/// Cells 0..256 hold the leak potential of each column, 256..512 the reset
/// potential, 512..528 shared biases. Values are 10 bit; 512 corresponds to
/// a membrane level of zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapMem {
    cells: Vec<u16>,
}

impl Default for CapMem {
    fn default() -> Self {
        Self {
            cells: vec![Self::ZERO_LEVEL; Self::CELLS],
        }
    }
}

impl CapMem {
    /// Number of cells.
    pub const CELLS: usize = 528;
    /// Cell value corresponding to a membrane level of zero.
    pub const ZERO_LEVEL: u16 = 512;
    /// Largest cell value.
    pub const MAX_VALUE: u16 = 1022;
    const RESET_OFFSET: usize = 256;

    /// Leak potential cell of `column`.
    pub fn leak(&self, column: NeuronColumn) -> u16 {
        self.cells[column.value()]
    }

    /// Sets the leak potential of `column`.
    pub fn set_leak(&mut self, column: NeuronColumn, value: u16) {
        self.cells[column.value()] = value.min(Self::MAX_VALUE);
    }

    /// Reset potential cell of `column`.
    pub fn reset_potential(&self, column: NeuronColumn) -> u16 {
        self.cells[Self::RESET_OFFSET + column.value()]
    }

    /// Converts a cell value into a membrane level.
    #[allow(clippy::cast_possible_truncation)]
    pub fn level(value: u16) -> i8 {
        ((i32::from(value) - i32::from(Self::ZERO_LEVEL)) / 4).clamp(-128, 127) as i8
    }
}

/// Resolved location of a configuration word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// Neuron config, linear neuron index.
    Neuron(usize),
    /// Neuron event output enable.
    EventOutput(usize),
    /// Synapse driver config, linear driver index.
    SynapseDriver(usize),
    /// PADI bus config, linear bus index.
    PadiBus(usize),
    /// Crossbar node config, node index.
    CrossbarNode(usize),
    /// Crossbar output config.
    CrossbarOutput(usize),
    /// Background source word `(source, word)`.
    BackgroundSpikeSource(usize, usize),
    /// MADC config word.
    Madc(usize),
    /// CADC config of a hemisphere.
    Cadc(Hemisphere),
    /// Synapse word `(hemisphere, word)`.
    Synapse(Hemisphere, usize),
    /// CapMem cell.
    CapMem(Hemisphere, usize),
    /// PPU internal memory word.
    PpuMemory(Hemisphere, usize),
    /// PPU external memory word.
    ExternalPpuMemory(usize),
}

impl Location {
    /// Word address of this location.
    pub fn address(self) -> Address {
        match self {
            Location::Neuron(i) => Address(map::NEURON).offset(i),
            Location::EventOutput(i) => Address(map::NEURON_EVENT_OUTPUT).offset(i),
            Location::SynapseDriver(i) => Address(map::SYNAPSE_DRIVER).offset(i),
            Location::PadiBus(i) => Address(map::PADI_BUS).offset(i),
            Location::CrossbarNode(i) => Address(map::CROSSBAR_NODE).offset(i),
            Location::CrossbarOutput(i) => Address(map::CROSSBAR_OUTPUT).offset(i),
            Location::BackgroundSpikeSource(i, w) => Address(map::BACKGROUND_SPIKE_SOURCE)
                .offset(i * BackgroundSpikeSourceConfig::WORDS + w),
            Location::Madc(w) => Address(map::READOUT).offset(w),
            Location::Cadc(h) => Address(map::CADC).offset(h.value()),
            Location::Synapse(h, w) => Address(map::SYNAPSE[h.value()]).offset(w),
            Location::CapMem(h, c) => address::capmem(h, c),
            Location::PpuMemory(h, w) => address::ppu_memory(h, w),
            Location::ExternalPpuMemory(w) => Address(map::EXTERNAL_PPU_MEMORY).offset(w),
        }
    }

    /// Resolves a configuration address.
    pub fn resolve(address: Address) -> Option<Location> {
        let region = address.region();
        let offset = (address.0 - region) as usize;
        let within = |base: u32, size: usize| address.0 >= base && ((address.0 - base) as usize) < size;
        let hemisphere_of = |bases: [u32; 2]| {
            Hemisphere::iter_all().find(|h| region == bases[h.value()])
        };

        if within(map::NEURON, 2 * NeuronColumn::SIZE) {
            return Some(Location::Neuron(offset));
        }
        if within(map::NEURON_EVENT_OUTPUT, NeuronEventOutput::SIZE) {
            return Some(Location::EventOutput((address.0 - map::NEURON_EVENT_OUTPUT) as usize));
        }
        if within(map::SYNAPSE_DRIVER, 2 * 128) {
            return Some(Location::SynapseDriver(offset));
        }
        if within(map::PADI_BUS, 8) {
            return Some(Location::PadiBus((address.0 - map::PADI_BUS) as usize));
        }
        if within(map::CROSSBAR_NODE, CrossbarNodeOnDls::SIZE) {
            return Some(Location::CrossbarNode(offset));
        }
        if within(map::CROSSBAR_OUTPUT, CrossbarOutput::SIZE) {
            return Some(Location::CrossbarOutput((address.0 - map::CROSSBAR_OUTPUT) as usize));
        }
        if within(
            map::BACKGROUND_SPIKE_SOURCE,
            BackgroundSpikeSourceOnDls::SIZE * BackgroundSpikeSourceConfig::WORDS,
        ) {
            let i = (address.0 - map::BACKGROUND_SPIKE_SOURCE) as usize;
            return Some(Location::BackgroundSpikeSource(
                i / BackgroundSpikeSourceConfig::WORDS,
                i % BackgroundSpikeSourceConfig::WORDS,
            ));
        }
        if within(map::READOUT, MadcConfig::WORDS) {
            return Some(Location::Madc(offset));
        }
        if within(map::CADC, 2) {
            return Hemisphere::from_value((address.0 - map::CADC) as usize).map(Location::Cadc);
        }
        if let Some(h) = hemisphere_of(map::SYNAPSE) {
            return (offset < SynapseMatrix::SIZE / 2).then_some(Location::Synapse(h, offset));
        }
        if let Some(h) = hemisphere_of(map::CAPMEM) {
            return (offset < CapMem::CELLS).then_some(Location::CapMem(h, offset));
        }
        if let Some(h) = hemisphere_of(map::PPU_MEMORY) {
            return (offset < PPU_MEMORY_WORDS).then_some(Location::PpuMemory(h, offset));
        }
        if within(map::EXTERNAL_PPU_MEMORY, EXTERNAL_PPU_MEMORY_BYTES / 4) {
            return Some(Location::ExternalPpuMemory(
                (address.0 - map::EXTERNAL_PPU_MEMORY) as usize,
            ));
        }
        None
    }

    fn all() -> Vec<Location> {
        let mut all = Vec::with_capacity(100_000);
        all.extend((0..2 * NeuronColumn::SIZE).map(Location::Neuron));
        all.extend((0..NeuronEventOutput::SIZE).map(Location::EventOutput));
        all.extend((0..2 * 128).map(Location::SynapseDriver));
        all.extend((0..8).map(Location::PadiBus));
        all.extend((0..CrossbarNodeOnDls::SIZE).map(Location::CrossbarNode));
        all.extend((0..CrossbarOutput::SIZE).map(Location::CrossbarOutput));
        for i in 0..BackgroundSpikeSourceOnDls::SIZE {
            all.extend((0..BackgroundSpikeSourceConfig::WORDS).map(|w| Location::BackgroundSpikeSource(i, w)));
        }
        all.extend((0..MadcConfig::WORDS).map(Location::Madc));
        all.extend(Hemisphere::iter_all().map(Location::Cadc));
        for h in Hemisphere::iter_all() {
            all.extend((0..SynapseMatrix::SIZE / 2).map(|w| Location::Synapse(h, w)));
        }
        for h in Hemisphere::iter_all() {
            all.extend((0..CapMem::CELLS).map(|c| Location::CapMem(h, c)));
        }
        for h in Hemisphere::iter_all() {
            all.extend((0..PPU_MEMORY_WORDS).map(|w| Location::PpuMemory(h, w)));
        }
        all.extend((0..EXTERNAL_PPU_MEMORY_BYTES / 4).map(Location::ExternalPpuMemory));
        all
    }
}

static LOCATIONS: LazyLock<Vec<Location>> = LazyLock::new(Location::all);

/// Complete static configuration of one chip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chip {
    /// Neuron configs, indexed by [`AtomicNeuron::index`].
    pub neurons: Vec<NeuronConfig>,
    /// Event output enables.
    pub event_outputs: [bool; 8],
    /// Synapse driver configs, indexed by [`SynapseDriverOnDls::index`].
    pub synapse_drivers: Vec<SynapseDriverConfig>,
    /// PADI bus configs, indexed by [`PadiBusOnDls::index`].
    pub padi_busses: [PadiBusConfig; 8],
    /// Crossbar node configs, indexed by [`CrossbarNodeOnDls::index`].
    pub crossbar_nodes: Vec<CrossbarNodeConfig>,
    /// Crossbar output configs.
    pub crossbar_outputs: [CrossbarOutputConfig; 12],
    /// Background spike sources.
    pub background_spike_sources: [BackgroundSpikeSourceConfig; 8],
    /// MADC readout chain.
    pub madc: MadcConfig,
    /// CADC per hemisphere.
    pub cadc: [CadcConfig; 2],
    /// Synapse matrices per hemisphere.
    pub synapses: [SynapseMatrix; 2],
    /// CapMem per hemisphere.
    pub capmem: [CapMem; 2],
    /// PPU internal memory per hemisphere.
    pub ppu_memory: [Vec<u32>; 2],
    /// PPU external memory.
    pub external_ppu_memory: Vec<u8>,
}

impl Default for Chip {
    fn default() -> Self {
        Self {
            neurons: vec![NeuronConfig::default(); 2 * NeuronColumn::SIZE],
            event_outputs: [false; 8],
            synapse_drivers: vec![SynapseDriverConfig::default(); 2 * 128],
            padi_busses: [PadiBusConfig::default(); 8],
            crossbar_nodes: vec![CrossbarNodeConfig::default(); CrossbarNodeOnDls::SIZE],
            crossbar_outputs: [CrossbarOutputConfig::default(); 12],
            background_spike_sources: [BackgroundSpikeSourceConfig::default(); 8],
            madc: MadcConfig::default(),
            cadc: [CadcConfig::default(); 2],
            synapses: [SynapseMatrix::default(), SynapseMatrix::default()],
            capmem: [CapMem::default(), CapMem::default()],
            ppu_memory: [vec![0; PPU_MEMORY_WORDS], vec![0; PPU_MEMORY_WORDS]],
            external_ppu_memory: vec![0; EXTERNAL_PPU_MEMORY_BYTES],
        }
    }
}

impl Chip {
    /// Neuron config.
    pub fn neuron(&self, neuron: AtomicNeuron) -> &NeuronConfig {
        &self.neurons[neuron.index()]
    }

    /// Mutable neuron config.
    pub fn neuron_mut(&mut self, neuron: AtomicNeuron) -> &mut NeuronConfig {
        &mut self.neurons[neuron.index()]
    }

    /// Synapse driver config.
    pub fn synapse_driver(&self, driver: SynapseDriverOnDls) -> &SynapseDriverConfig {
        &self.synapse_drivers[driver.index()]
    }

    /// Mutable synapse driver config.
    pub fn synapse_driver_mut(&mut self, driver: SynapseDriverOnDls) -> &mut SynapseDriverConfig {
        &mut self.synapse_drivers[driver.index()]
    }

    /// PADI bus config.
    pub fn padi_bus(&self, bus: PadiBusOnDls) -> &PadiBusConfig {
        &self.padi_busses[bus.index()]
    }

    /// Mutable PADI bus config.
    pub fn padi_bus_mut(&mut self, bus: PadiBusOnDls) -> &mut PadiBusConfig {
        &mut self.padi_busses[bus.index()]
    }

    /// Crossbar node config.
    pub fn crossbar_node(&self, node: CrossbarNodeOnDls) -> &CrossbarNodeConfig {
        &self.crossbar_nodes[node.index()]
    }

    /// Mutable crossbar node config.
    pub fn crossbar_node_mut(&mut self, node: CrossbarNodeOnDls) -> &mut CrossbarNodeConfig {
        &mut self.crossbar_nodes[node.index()]
    }

    /// Word currently configured at `location`.
    pub fn word(&self, location: Location) -> Word {
        match location {
            Location::Neuron(i) => self.neurons[i].to_word(),
            Location::EventOutput(i) => Word(u32::from(self.event_outputs[i])),
            Location::SynapseDriver(i) => self.synapse_drivers[i].to_word(),
            Location::PadiBus(i) => Word(u32::from(self.padi_busses[i].enable_spl1)),
            Location::CrossbarNode(i) => self.crossbar_nodes[i].to_word(),
            Location::CrossbarOutput(i) => {
                Word(u32::from(self.crossbar_outputs[i].enable_event_counter))
            }
            Location::BackgroundSpikeSource(i, w) => self.background_spike_sources[i].to_words()[w],
            Location::Madc(w) => self.madc.to_words()[w],
            Location::Cadc(h) => self.cadc[h.value()].to_word(),
            Location::Synapse(h, w) => self.synapses[h.value()].to_word(w),
            Location::CapMem(h, c) => Word(u32::from(self.capmem[h.value()].cells[c])),
            Location::PpuMemory(h, w) => Word(self.ppu_memory[h.value()][w]),
            Location::ExternalPpuMemory(w) => {
                let b = &self.external_ppu_memory[w * 4..w * 4 + 4];
                Word(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
        }
    }

    /// Applies one word at `location`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_word(&mut self, location: Location, word: Word) {
        match location {
            Location::Neuron(i) => self.neurons[i] = NeuronConfig::from_word(word),
            Location::EventOutput(i) => self.event_outputs[i] = word.bit(0),
            Location::SynapseDriver(i) => {
                self.synapse_drivers[i] = SynapseDriverConfig::from_word(word);
            }
            Location::PadiBus(i) => self.padi_busses[i].enable_spl1 = word.bit(0),
            Location::CrossbarNode(i) => self.crossbar_nodes[i] = CrossbarNodeConfig::from_word(word),
            Location::CrossbarOutput(i) => {
                self.crossbar_outputs[i].enable_event_counter = word.bit(0);
            }
            Location::BackgroundSpikeSource(i, w) => {
                self.background_spike_sources[i].set_word(w, word);
            }
            Location::Madc(w) => self.madc.set_word(w, word),
            Location::Cadc(h) => self.cadc[h.value()] = CadcConfig::from_word(word),
            Location::Synapse(h, w) => self.synapses[h.value()].set_word(w, word),
            Location::CapMem(h, c) => {
                self.capmem[h.value()].cells[c] = (word.0 as u16).min(CapMem::MAX_VALUE);
            }
            Location::PpuMemory(h, w) => self.ppu_memory[h.value()][w] = word.0,
            Location::ExternalPpuMemory(w) => {
                self.external_ppu_memory[w * 4..w * 4 + 4].copy_from_slice(&word.0.to_be_bytes());
            }
        }
    }

    /// Word configured at `address`.
    pub fn read(&self, address: Address) -> Result<Word> {
        Location::resolve(address)
            .map(|l| self.word(l))
            .ok_or(HardwareError::UnknownAddress(address))
    }

    /// Applies a write to `address`.
    pub fn write(&mut self, address: Address, word: Word) -> Result<()> {
        let location = Location::resolve(address).ok_or(HardwareError::UnknownAddress(address))?;
        self.set_word(location, word);
        Ok(())
    }

    /// Visits every configuration word in address order.
    pub fn visit(&self, mut f: impl FnMut(Address, Word)) {
        for &location in LOCATIONS.iter() {
            f(location.address(), self.word(location));
        }
    }

    /// Encodes the complete image into writes, in address order.
    pub fn encode(&self) -> Vec<(Address, Word)> {
        let mut words = Vec::with_capacity(LOCATIONS.len());
        self.visit(|a, w| words.push((a, w)));
        words
    }

    /// Every configuration address, in encoding order.
    pub fn addresses() -> impl Iterator<Item = Address> {
        LOCATIONS.iter().map(|l| l.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neuron_word_roundtrip() {
        let config = NeuronConfig {
            enable_fire: true,
            enable_excitatory_input: true,
            enable_inhibitory_input: false,
            enable_address_out: true,
            enable_readout: true,
            readout_source: ReadoutSource::InhibitorySynapticInput,
            threshold: -17,
            address_out: 0x2abc,
        };
        assert_eq!(NeuronConfig::from_word(config.to_word()), config);
    }

    #[test]
    fn crossbar_drop_all_never_matches() {
        for label in [0u16, 1, 0x3fff] {
            assert!(!CrossbarNodeConfig::DROP_ALL.matches(label));
            assert!(CrossbarNodeConfig::PASS_ALL.matches(label));
        }
        let node = CrossbarNodeConfig {
            mask: 0x00ff,
            target: 0x0012,
            enable_drop_counter: false,
        };
        assert!(node.matches(0x3f12));
        assert!(!node.matches(0x3f13));
    }

    #[test]
    fn encode_covers_every_location_once() {
        let chip = Chip::default();
        let words = chip.encode();
        assert_eq!(words.len(), LOCATIONS.len());
        assert!(words.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn write_then_read_through_address() {
        let mut chip = Chip::default();
        let addr = address::synapse(Hemisphere::Bottom, 7, 11);
        chip.write(addr, Word(0x0fff_0040)).unwrap();
        assert_eq!(chip.synapses[1].weight(7, 11), 63);
        assert_eq!(chip.synapses[1].label(7, 11), 63);
        assert_eq!(chip.synapses[1].label(7, 10), 1);
        assert_eq!(chip.read(addr).unwrap(), Word(0x0fff_0040));

        assert!(matches!(
            chip.write(Address(map::NULL_PAYLOAD), Word(0)),
            Err(HardwareError::UnknownAddress(_))
        ));
    }

    #[test]
    fn encode_then_apply_reproduces_chip() {
        let mut chip = Chip::default();
        chip.neuron_mut(AtomicNeuron::new(Hemisphere::Top, NeuronColumn::new(3)))
            .enable_fire = true;
        chip.madc.sources[1] = Some(AtomicNeuron::new(Hemisphere::Bottom, NeuronColumn::new(200)));
        chip.capmem[1].set_leak(NeuronColumn::new(9), 700);
        chip.external_ppu_memory[5] = 0xab;
        chip.background_spike_sources[2].seed = 77;

        let mut copy = Chip::default();
        for (a, w) in chip.encode() {
            copy.write(a, w).unwrap();
        }
        assert_eq!(copy, chip);
    }

    #[test]
    fn capmem_level_conversion() {
        assert_eq!(CapMem::level(CapMem::ZERO_LEVEL), 0);
        assert_eq!(CapMem::level(1022), 127);
        assert_eq!(CapMem::level(0), -128);
    }
}
