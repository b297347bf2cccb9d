//! Register file and instruction interpreter of one simulated chip.
//!
//! Instructions take no time except `WaitUntil` and `PollUntil`, which
//! advance the FPGA timer and let the network and both PPUs catch up. The
//! timer is never rewound; `TimerReset` only moves the base that
//! `WaitUntil` targets are relative to.

use tracing::{debug, warn};

use sigflow_hw::address::{NEURON_RESET_WORDS, map};
use sigflow_hw::chip::Location;
use sigflow_hw::coord::{
    AtomicNeuron, BackgroundSpikeSourceOnDls, CrossbarInput, Hemisphere, NeuronColumn,
};
use sigflow_hw::health::offset as health_offset;
use sigflow_hw::{
    Address, Chip, FpgaTime, HardwareError, HardwareParameters, HealthSnapshot, Instruction,
    MadcSampleFromChip, ReadResult, SpikeFromChip, Word,
};

use super::network::Network;
use super::ppu::{Environment, SimulatedPpu};
use crate::error::{BackendError, Result};

/// Advances longer than this skip background sources and MADC samples.
const FAST_FORWARD_CYCLES: u64 = 10 * 125_000;

/// FPGA-side memory, grown on first touch.
#[derive(Debug, Default)]
pub(crate) struct Dram {
    bytes: Vec<u8>,
}

impl Dram {
    /// Addressable bytes.
    pub(crate) const CAPACITY: usize = sigflow_hw::chip::EXTERNAL_DRAM_BYTES;

    fn read_word(&self, byte: usize) -> u32 {
        let mut word = [0u8; 4];
        if let Some(bytes) = self.bytes.get(byte..byte + 4) {
            word.copy_from_slice(bytes);
        }
        u32::from_be_bytes(word)
    }

    /// Writes `bytes` at `offset`; false if they do not fit.
    pub(crate) fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let end = offset + bytes.len();
        if end > Self::CAPACITY {
            return false;
        }
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[offset..end].copy_from_slice(bytes);
        true
    }
}

/// Events received while executing one program.
pub(crate) type Received = (Vec<SpikeFromChip>, Vec<MadcSampleFromChip>);

/// State of one simulated chip and its FPGA.
#[derive(Debug)]
pub(crate) struct SimulatedChip {
    config: Chip,
    network: Network,
    ppus: [SimulatedPpu; 2],
    ppu_control: [u32; 2],
    dram: Dram,
    health: HealthSnapshot,
    systime: u64,
    timer_base: u64,
    instruction_timeout: u64,
    params: HardwareParameters,
}

impl SimulatedChip {
    pub(crate) fn new(params: &HardwareParameters) -> Self {
        Self {
            config: Chip::default(),
            network: Network::new(0),
            ppus: Hemisphere::ALL.map(|h| SimulatedPpu::new(h, params)),
            ppu_control: [0; 2],
            dram: Dram::default(),
            health: HealthSnapshot::default(),
            systime: 0,
            timer_base: 0,
            instruction_timeout: params.default_instruction_timeout.value(),
            params: params.clone(),
        }
    }

    /// Current FPGA time.
    pub(crate) fn systime(&self) -> u64 {
        self.systime
    }

    /// Configuration currently held by the register file.
    pub(crate) fn config(&self) -> &Chip {
        &self.config
    }

    /// Forgets everything but the FPGA timer and the link counters, as if
    /// another experiment had used the chip.
    pub(crate) fn reset(&mut self) {
        let now = self.systime;
        let arq = self.health.arq;
        let phy = self.health.phy;
        *self = Self {
            network: Network::new(now),
            systime: now,
            timer_base: now,
            ..Self::new(&self.params)
        };
        self.health.arq = arq;
        self.health.phy = phy;
    }

    /// Runs `instructions`, fulfilling read tickets on the way.
    pub(crate) fn execute(&mut self, instructions: &[Instruction]) -> Result<Received> {
        for instruction in instructions {
            self.health.arq.tx_count = self.health.arq.tx_count.wrapping_add(1);
            self.health.phy[0].tx_count = self.health.phy[0].tx_count.wrapping_add(1);
            match instruction {
                Instruction::TimerReset => self.timer_base = self.systime,
                Instruction::WaitUntil(time) => {
                    let target = self.timer_base + time.value();
                    if target > self.systime {
                        self.advance(target);
                    }
                }
                Instruction::Write { address, word } => {
                    self.health.arq.write_count = self.health.arq.write_count.wrapping_add(1);
                    self.write_word(*address, *word)?;
                }
                Instruction::Read { ticket } => {
                    let words = (0..ticket.count())
                        .map(|i| self.read_word(ticket.address().offset(i)))
                        .collect::<Result<Vec<_>>>()?;
                    self.health.arq.read_count = self.health.arq.read_count.wrapping_add(1);
                    self.health.arq.rx_count = self.health.arq.rx_count.wrapping_add(1);
                    #[allow(clippy::cast_possible_truncation)]
                    let received = words.len() as u32;
                    self.health.phy[0].rx_count = self.health.phy[0].rx_count.wrapping_add(received);
                    ticket.fulfil(ReadResult {
                        words,
                        fpga_time: FpgaTime(self.systime),
                    });
                }
                Instruction::Spike(label) => {
                    self.network
                        .inject(self.systime, CrossbarInput::from_l2(label.l2_channel()), *label);
                }
                Instruction::PollUntil {
                    address,
                    mask,
                    expected,
                } => self.poll(*address, *mask, *expected)?,
                Instruction::Barrier => {}
            }
        }
        Ok(self.network.take_received())
    }

    fn poll(&mut self, address: Address, mask: u32, expected: u32) -> Result<()> {
        let deadline = self.systime + self.instruction_timeout;
        loop {
            if self.read_word(address)?.0 & mask == expected {
                return Ok(());
            }
            match self.next_event_time().filter(|&t| t <= deadline) {
                Some(t) => self.advance(t.max(self.systime)),
                None => {
                    self.advance(deadline);
                    warn!(%address, mask, expected, "poll timed out");
                    return Ok(());
                }
            }
        }
    }

    fn next_event_time(&self) -> Option<u64> {
        [
            self.network.next_event_time(),
            self.ppus[0].next_event_time(),
            self.ppus[1].next_event_time(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn advance(&mut self, target: u64) {
        if target.saturating_sub(self.systime) > FAST_FORWARD_CYCLES {
            debug!(from = self.systime, to = target, "fast-forwarding background activity");
            self.network.fast_forward(&self.config, target);
        }
        while let Some(t) = self.next_event_time().filter(|&t| t <= target) {
            self.systime = self.systime.max(t);
            self.network.process(&self.config, &mut self.health, t);
            for ppu in &mut self.ppus {
                let mut env = Environment {
                    chip: &mut self.config,
                    network: &mut self.network,
                    dram: &mut self.dram,
                };
                ppu.process(&mut env, t);
            }
        }
        self.systime = target;
    }

    /// Word at `address` as the host reads it.
    pub(crate) fn read_word(&self, address: Address) -> Result<Word> {
        if let Some(location) = Location::resolve(address) {
            return Ok(self.config.word(location));
        }
        let a = address.0;
        let word = match a {
            _ if (map::EXTERNAL_DRAM..map::EVENT_RECORDING).contains(&a) => {
                self.dram.read_word(4 * (a - map::EXTERNAL_DRAM) as usize)
            }
            map::EVENT_RECORDING => u32::from(self.network.event_recording),
            map::MADC_CONTROL => self.network.madc_status(),
            #[allow(clippy::cast_possible_truncation)]
            map::INSTRUCTION_TIMEOUT => self.instruction_timeout as u32,
            map::NULL_PAYLOAD => 0,
            _ if (map::NEURON_RESET..map::NEURON_RESET + 2 * NEURON_RESET_WORDS as u32)
                .contains(&a) =>
            {
                0
            }
            _ if (map::HEALTH..map::HEALTH + health_offset::WORDS as u32).contains(&a) => {
                self.health.to_words()[(a - map::HEALTH) as usize].0
            }
            _ => match ppu_register(address) {
                Some((h, false)) => self.ppu_control[h.value()],
                Some((h, true)) => self.ppus[h.value()].status_register(),
                None => return Err(HardwareError::UnknownAddress(address).into()),
            },
        };
        Ok(Word(word))
    }

    fn write_word(&mut self, address: Address, word: Word) -> Result<()> {
        let t = self.systime;
        if let Some(location) = Location::resolve(address) {
            self.config.set_word(location, word);
            match location {
                Location::BackgroundSpikeSource(source, _) => self.network.restart_source(
                    &self.config,
                    BackgroundSpikeSourceOnDls::new(source),
                    t,
                ),
                Location::PpuMemory(h, offset) => {
                    let mut env = Environment {
                        chip: &mut self.config,
                        network: &mut self.network,
                        dram: &mut self.dram,
                    };
                    self.ppus[h.value()].on_memory_write(&mut env, offset, t);
                }
                _ => {}
            }
            return Ok(());
        }
        let a = address.0;
        match a {
            _ if (map::EXTERNAL_DRAM..map::EVENT_RECORDING).contains(&a) => {
                let byte = 4 * (a - map::EXTERNAL_DRAM) as usize;
                if !self.dram.write_bytes(byte, &word.0.to_be_bytes()) {
                    return Err(HardwareError::UnknownAddress(address).into());
                }
            }
            map::EVENT_RECORDING => self.network.event_recording = word.bit(0),
            map::MADC_CONTROL => self.network.madc_control(&self.config, word.0, t),
            map::INSTRUCTION_TIMEOUT => self.instruction_timeout = u64::from(word.0),
            map::NULL_PAYLOAD => return Err(BackendError::ReadOnly(address)),
            _ if (map::NEURON_RESET..map::NEURON_RESET + 2 * NEURON_RESET_WORDS as u32)
                .contains(&a) =>
            {
                let index = (a - map::NEURON_RESET) as usize;
                let hemisphere = Hemisphere::ALL[index / NEURON_RESET_WORDS];
                let first = 32 * (index % NEURON_RESET_WORDS);
                for bit in (0..32).filter(|&bit| word.bit(bit)) {
                    let column = NeuronColumn::new(first + bit as usize);
                    let neuron = AtomicNeuron::new(hemisphere, column);
                    self.network.reset_neuron(&self.config, neuron, t);
                }
            }
            _ if (map::HEALTH..map::HEALTH + health_offset::WORDS as u32).contains(&a) => {
                return Err(BackendError::ReadOnly(address));
            }
            _ => match ppu_register(address) {
                Some((h, false)) => self.write_ppu_control(h, word.0),
                Some((_, true)) => return Err(BackendError::ReadOnly(address)),
                None => return Err(HardwareError::UnknownAddress(address).into()),
            },
        }
        Ok(())
    }

    fn write_ppu_control(&mut self, hemisphere: Hemisphere, word: u32) {
        let h = hemisphere.value();
        let was_running = self.ppu_control[h] & 1 != 0;
        self.ppu_control[h] = word;
        match (was_running, word & 1 != 0) {
            (false, true) => self.ppus[h].boot(&mut self.config),
            (true, false) => self.ppus[h].halt(),
            _ => {}
        }
    }
}

/// Hemisphere and whether `address` is the status (not the control) register.
fn ppu_register(address: Address) -> Option<(Hemisphere, bool)> {
    Hemisphere::iter_all().find_map(|h| {
        let control = map::PPU_CONTROL[h.value()];
        match address.0.checked_sub(control) {
            Some(0) => Some((h, false)),
            Some(1) => Some((h, true)),
            _ => None,
        }
    })
}
