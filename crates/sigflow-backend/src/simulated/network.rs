//! Spiking dynamics of the simulated chip.
//!
//! Events travel through the chip as
//!
//! ```text
//!   L2 input ──┐
//!   background ├─► crossbar ─┬─► L2 output ──► recorded spike
//!   neurons ───┘      ▲      └─► PADI bus ──► synapse drivers ──► rows ─┐
//!                     │                                                 │
//!                     └──────────── neuron fires ◄── membrane ◄─────────┘
//! ```
//!
//! Membranes relax exponentially towards the leak level stored in the
//! CapMem and jump by the signed weight of every synapse an event reaches.
//! Time is counted in FPGA cycles; the owner advances it event by event.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use sigflow_hw::chip::CapMem;
use sigflow_hw::coord::{
    AtomicNeuron, BackgroundSpikeSourceOnDls, CrossbarInput, CrossbarNodeOnDls, CrossbarOutput,
    NeuronColumn, PadiBusOnDls, SynapseDriverOnDls, SynapseDriverOnHemisphere,
};
use sigflow_hw::event::MadcChannel;
use sigflow_hw::{
    Chip, ChipTime, FpgaTime, HealthSnapshot, MadcSampleFromChip, SpikeFromChip, SpikeLabel,
};

/// Membrane time constant in FPGA cycles.
const TAU_CYCLES: f64 = 1250.0;
/// Cycles a neuron ignores input after it fired.
const REFRACTORY_CYCLES: u64 = 250;
/// Latency from a neuron spike to its crossbar input.
const NEURON_TO_CROSSBAR_CYCLES: u64 = 8;
/// Latency through crossbar and PADI bus.
const CROSSBAR_CYCLES: u64 = 2;
/// Hardware event counters are 16 bit wide.
const COUNTER_MASK: u32 = 0xffff;

#[derive(Clone, Copy, Debug)]
struct Membrane {
    level: f64,
    time: u64,
    refractory_until: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PendingEvent {
    time: u64,
    seq: u64,
    input: CrossbarInput,
    label: SpikeLabel,
}

#[derive(Clone, Copy, Debug, Default)]
struct SourceState {
    next: Option<u64>,
    rng: u32,
}

/// MADC sampling state.
#[derive(Clone, Copy, Debug, Default)]
struct Madc {
    armed: bool,
    next: Option<u64>,
    taken: u32,
    channel: u8,
}

/// Membranes, in-flight events, background sources and the MADC of one chip.
#[derive(Debug)]
pub(crate) struct Network {
    membranes: Vec<Membrane>,
    queue: BinaryHeap<Reverse<PendingEvent>>,
    seq: u64,
    sources: [SourceState; BackgroundSpikeSourceOnDls::SIZE],
    madc: Madc,
    pub(crate) event_recording: bool,
    spikes: Vec<SpikeFromChip>,
    madc_samples: Vec<MadcSampleFromChip>,
}

impl Network {
    /// Network at rest at time `now`.
    pub(crate) fn new(now: u64) -> Self {
        Self {
            membranes: vec![
                Membrane {
                    level: 0.0,
                    time: now,
                    refractory_until: now,
                };
                2 * NeuronColumn::SIZE
            ],
            queue: BinaryHeap::new(),
            seq: 0,
            sources: [SourceState::default(); BackgroundSpikeSourceOnDls::SIZE],
            madc: Madc::default(),
            event_recording: false,
            spikes: Vec::new(),
            madc_samples: Vec::new(),
        }
    }

    /// Membrane level of `neuron` at time `t`.
    pub(crate) fn level(&self, chip: &Chip, neuron: AtomicNeuron, t: u64) -> f64 {
        let m = self.membranes[neuron.index()];
        let from = m.time.max(m.refractory_until);
        if t <= from {
            return m.level;
        }
        let leak = f64::from(CapMem::level(
            chip.capmem[neuron.hemisphere.value()].leak(neuron.column),
        ));
        #[allow(clippy::cast_precision_loss)]
        let decay = (-((t - from) as f64) / TAU_CYCLES).exp();
        leak + (m.level - leak) * decay
    }

    /// Membrane level as seen by the 8-bit CADC.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn level_i8(&self, chip: &Chip, neuron: AtomicNeuron, t: u64) -> i8 {
        self.level(chip, neuron, t).round().clamp(-128.0, 127.0) as i8
    }

    /// Pulls `neuron` to its reset potential without a refractory period.
    pub(crate) fn reset_neuron(&mut self, chip: &Chip, neuron: AtomicNeuron, t: u64) {
        let reset = chip.capmem[neuron.hemisphere.value()].reset_potential(neuron.column);
        self.membranes[neuron.index()] = Membrane {
            level: f64::from(CapMem::level(reset)),
            time: t,
            refractory_until: t,
        };
    }

    /// Queues an event entering the crossbar at `input`.
    pub(crate) fn inject(&mut self, t: u64, input: CrossbarInput, label: SpikeLabel) {
        self.seq += 1;
        self.queue.push(Reverse(PendingEvent {
            time: t,
            seq: self.seq,
            input,
            label,
        }));
    }

    /// Restarts a background source after its configuration was written.
    pub(crate) fn restart_source(&mut self, chip: &Chip, source: BackgroundSpikeSourceOnDls, t: u64) {
        let config = chip.background_spike_sources[source.value()];
        self.sources[source.value()] = SourceState {
            next: config.enable.then(|| t + u64::from(config.period.max(1))),
            rng: config.seed.max(1),
        };
    }

    /// Applies a write to the MADC control register.
    pub(crate) fn madc_control(&mut self, chip: &Chip, word: u32, t: u64) {
        if word & 1 != 0 {
            self.madc.armed = true;
        }
        if word & 2 != 0 && self.madc.armed {
            self.madc.next = Some(t + u64::from(chip.madc.sample_period.max(1)));
            self.madc.taken = 0;
            self.madc.channel = chip.madc.initial_channel & 1;
        }
        if word & 4 != 0 {
            self.madc = Madc::default();
        }
    }

    /// MADC control register as read back.
    pub(crate) fn madc_status(&self) -> u32 {
        u32::from(self.madc.armed) | u32::from(self.madc.next.is_some()) << 1
    }

    /// Earliest pending activity.
    pub(crate) fn next_event_time(&self) -> Option<u64> {
        let queued = self.queue.peek().map(|Reverse(e)| e.time);
        let sources = self.sources.iter().filter_map(|s| s.next);
        queued.into_iter().chain(sources).chain(self.madc.next).min()
    }

    /// Processes everything due up to `t`.
    pub(crate) fn process(&mut self, chip: &Chip, health: &mut HealthSnapshot, t: u64) {
        for source in BackgroundSpikeSourceOnDls::iter_all() {
            if self.sources[source.value()].next.is_some_and(|n| n <= t) {
                self.emit_background(chip, source, t);
            }
        }
        if self.madc.next.is_some_and(|n| n <= t) {
            self.sample_madc(chip, t);
        }
        while let Some(Reverse(event)) = self.queue.peek().copied() {
            if event.time > t {
                break;
            }
            self.queue.pop();
            self.route(chip, health, event);
        }
    }

    /// Moves background sources and the MADC past `target` without
    /// producing their events.
    pub(crate) fn fast_forward(&mut self, chip: &Chip, target: u64) {
        for (state, config) in self.sources.iter_mut().zip(&chip.background_spike_sources) {
            if let Some(next) = state.next.filter(|&n| n <= target) {
                let period = u64::from(config.period.max(1));
                state.next = Some(next + ((target - next) / period + 1) * period);
            }
        }
        if let Some(next) = self.madc.next.filter(|&n| n <= target) {
            let period = u64::from(chip.madc.sample_period.max(1));
            let skipped = (target - next) / period + 1;
            self.madc.taken = self
                .madc
                .taken
                .saturating_add(u32::try_from(skipped).unwrap_or(u32::MAX));
            self.madc.next = Some(next + skipped * period);
            let limit = chip.madc.number_of_samples;
            if limit > 0 && self.madc.taken >= limit {
                self.madc.next = None;
            }
        }
    }

    /// Hands out everything recorded since the last call.
    pub(crate) fn take_received(&mut self) -> (Vec<SpikeFromChip>, Vec<MadcSampleFromChip>) {
        (
            std::mem::take(&mut self.spikes),
            std::mem::take(&mut self.madc_samples),
        )
    }

    fn emit_background(&mut self, chip: &Chip, source: BackgroundSpikeSourceOnDls, t: u64) {
        let config = chip.background_spike_sources[source.value()];
        let state = &mut self.sources[source.value()];
        state.next = Some(t + u64::from(config.period.max(1)));
        let mut label = config.neuron_label;
        if config.enable_random {
            state.rng = xorshift(state.rng);
            if state.rng & 0xff >= u32::from(config.rate) {
                return;
            }
            #[allow(clippy::cast_possible_truncation)]
            let random = (state.rng >> 8) as u16 & u16::from(config.mask);
            label = (label & !u16::from(config.mask)) | random;
        }
        self.inject(t, source.crossbar_input(), SpikeLabel(label));
    }

    fn sample_madc(&mut self, chip: &Chip, t: u64) {
        let config = chip.madc;
        let channel = self.madc.channel;
        let value = config.sources[usize::from(channel)].map_or(512, |neuron| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let v = (self.level(chip, neuron, t) * 4.0 + 512.0).round().clamp(0.0, 1023.0) as u16;
            v
        });
        self.madc_samples.push(MadcSampleFromChip {
            chip_time: ChipTime(t),
            fpga_time: FpgaTime(t),
            value,
            channel: MadcChannel(channel),
        });
        self.madc.taken += 1;
        if config.switch_period > 0 && self.madc.taken % u32::from(config.switch_period) == 0 {
            self.madc.channel ^= 1;
        }
        self.madc.next = if config.number_of_samples > 0 && self.madc.taken >= config.number_of_samples
        {
            None
        } else {
            Some(t + u64::from(config.sample_period.max(1)))
        };
    }

    fn route(&mut self, chip: &Chip, health: &mut HealthSnapshot, event: PendingEvent) {
        let t = event.time + CROSSBAR_CYCLES;
        let neuron_label = event.label.neuron_label();
        for output in CrossbarOutput::iter_all() {
            let node = chip.crossbar_node(CrossbarNodeOnDls::new(event.input, output));
            if !node.matches(neuron_label) {
                if node.enable_drop_counter {
                    bump(&mut health.crossbar_input_drop[event.input.value()]);
                }
                continue;
            }
            if chip.crossbar_outputs[output.value()].enable_event_counter {
                bump(&mut health.crossbar_output_event[output.value()]);
            }
            if let Some(channel) = output.l2_channel() {
                if self.event_recording {
                    self.spikes.push(SpikeFromChip {
                        chip_time: ChipTime(t),
                        fpga_time: FpgaTime(t),
                        label: SpikeLabel::new(channel, neuron_label),
                    });
                }
            } else if let Some(bus) = output.padi_bus() {
                if chip.padi_bus(bus).enable_spl1 {
                    self.drive_bus(chip, bus, event.label, t);
                }
            }
        }
    }

    fn drive_bus(&mut self, chip: &Chip, bus: PadiBusOnDls, label: SpikeLabel, t: u64) {
        let hemisphere = bus.hemisphere;
        let synapses = &chip.synapses[hemisphere.value()];
        let mut inputs = Vec::new();
        for driver in SynapseDriverOnHemisphere::iter_all().filter(|d| d.padi_bus() == bus.bus) {
            let coord = SynapseDriverOnDls::new(hemisphere, driver);
            let config = chip.synapse_driver(coord);
            if !config.accepts(coord, label.row_select()) {
                continue;
            }
            let address = if config.enable_address_out {
                label.synapse_label()
            } else {
                0
            };
            for (row, mode) in driver
                .rows()
                .into_iter()
                .zip([config.row_mode_top, config.row_mode_bottom])
            {
                let sign = mode.sign();
                if sign == 0 {
                    continue;
                }
                for column in NeuronColumn::iter_all() {
                    let weight = synapses.weight(row.value(), column.value());
                    if weight > 0 && synapses.label(row.value(), column.value()) == address {
                        inputs.push((column, sign * i32::from(weight)));
                    }
                }
            }
        }
        for (column, delta) in inputs {
            self.stimulate(chip, AtomicNeuron::new(hemisphere, column), delta, t);
        }
    }

    fn stimulate(&mut self, chip: &Chip, neuron: AtomicNeuron, delta: i32, t: u64) {
        let config = chip.neuron(neuron);
        let accepted = if delta > 0 {
            config.enable_excitatory_input
        } else {
            config.enable_inhibitory_input
        };
        if !accepted || t < self.membranes[neuron.index()].refractory_until {
            return;
        }
        let level = (self.level(chip, neuron, t) + f64::from(delta)).clamp(-128.0, 127.0);
        self.membranes[neuron.index()] = Membrane {
            level,
            time: t,
            refractory_until: t,
        };
        if config.enable_fire && level >= f64::from(config.threshold) {
            self.fire(chip, neuron, t);
        }
    }

    fn fire(&mut self, chip: &Chip, neuron: AtomicNeuron, t: u64) {
        self.reset_neuron(chip, neuron, t);
        self.membranes[neuron.index()].refractory_until = t + REFRACTORY_CYCLES;
        let config = chip.neuron(neuron);
        let output = neuron.event_output();
        if config.enable_address_out && chip.event_outputs[output.value()] {
            self.inject(
                t + NEURON_TO_CROSSBAR_CYCLES,
                output.crossbar_input(),
                SpikeLabel(config.address_out & 0x3fff),
            );
        }
    }
}

fn bump(counter: &mut u32) {
    *counter = (*counter + 1) & COUNTER_MASK;
}

fn xorshift(mut x: u32) -> u32 {
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}
