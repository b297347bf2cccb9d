//! Interpreter for the generated PPU image.
//!
//! The simulated PPU does not execute code. Once released from reset it
//! decodes the image header and then reacts to command words written to the
//! `status` symbol, the way the generated main loop would:
//!
//! ```text
//!  reset ──inhibit_reset──► boot ──► Idle ◄──────────────┐
//!                                     │ command written  │ done
//!                                     ▼                  │
//!                      BaselineRead / Read / ResetNeurons┤
//!                      Scheduler (until runtime elapsed) ┤
//!                      PeriodicRead / StopPeriodicRead ──┘
//!                                     │ Stop
//!                                     ▼
//!                                   sleep
//! ```

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::{debug, trace, warn};

use sigflow_hw::coord::{AtomicNeuron, Hemisphere, NeuronColumn};
use sigflow_hw::ppu::{
    self, PpuCommand, PpuImageHeader, RecordingKind, STATUS_SLEEP, image, periodic,
};
use sigflow_hw::{Chip, HardwareParameters};

use super::chip::Dram;
use super::network::Network;

/// Memories the PPU reads and writes besides its own.
pub(crate) struct Environment<'a> {
    pub(crate) chip: &'a mut Chip,
    pub(crate) network: &'a mut Network,
    pub(crate) dram: &'a mut Dram,
}

#[derive(Debug)]
struct Scheduler {
    start: u64,
    end: u64,
    invocations: BinaryHeap<Reverse<(u64, usize, u32)>>,
}

#[derive(Clone, Copy, Debug)]
struct PeriodicRead {
    start: u64,
    next: u64,
}

/// PPU of one hemisphere.
#[derive(Debug)]
pub(crate) struct SimulatedPpu {
    hemisphere: Hemisphere,
    header: Option<PpuImageHeader>,
    baseline: Option<Vec<i8>>,
    scheduler: Option<Scheduler>,
    periodic: Option<PeriodicRead>,
    ppu_wait_cycles: u64,
}

impl SimulatedPpu {
    pub(crate) fn new(hemisphere: Hemisphere, params: &HardwareParameters) -> Self {
        Self {
            hemisphere,
            header: None,
            baseline: None,
            scheduler: None,
            periodic: None,
            ppu_wait_cycles: u64::from(params.periodic_cadc_ppu_wait_clock_cycles) / 2,
        }
    }

    /// Whether the main loop runs.
    pub(crate) fn is_running(&self) -> bool {
        self.header.is_some()
    }

    /// Value of the status register.
    pub(crate) fn status_register(&self) -> u32 {
        if self.is_running() { 0 } else { STATUS_SLEEP }
    }

    /// Reset released: decode the image and enter the main loop.
    pub(crate) fn boot(&mut self, chip: &mut Chip) {
        let h = self.hemisphere.value();
        match PpuImageHeader::decode(&chip.ppu_memory[h]) {
            Ok(header) => {
                debug!(hemisphere = %self.hemisphere, rules = header.rules.len(), "PPU booted");
                write_internal(chip, self.hemisphere, header.status, PpuCommand::Idle.word());
                write_internal(chip, self.hemisphere, header.stopped, 0);
                self.header = Some(header);
            }
            Err(err) => debug!(hemisphere = %self.hemisphere, %err, "PPU memory holds no image"),
        }
    }

    /// Reset asserted.
    pub(crate) fn halt(&mut self) {
        self.header = None;
        self.baseline = None;
        self.scheduler = None;
        self.periodic = None;
    }

    /// Reacts to a host write of internal memory word `offset`.
    pub(crate) fn on_memory_write(&mut self, env: &mut Environment<'_>, offset: usize, t: u64) {
        let Some(header) = &self.header else {
            return;
        };
        if offset != header.status as usize {
            return;
        }
        let word = env.chip.ppu_memory[self.hemisphere.value()][offset];
        match PpuCommand::from_word(word) {
            Some(command) => self.execute(env, command, t),
            None => warn!(hemisphere = %self.hemisphere, word, "unknown PPU command"),
        }
    }

    /// Earliest pending activity.
    pub(crate) fn next_event_time(&self) -> Option<u64> {
        let scheduler = self.scheduler.as_ref().map(|s| {
            s.invocations
                .peek()
                .map_or(s.end, |Reverse((t, _, _))| (*t).min(s.end))
        });
        scheduler.into_iter().chain(self.periodic.map(|p| p.next)).min()
    }

    /// Processes everything due at exactly `t`.
    pub(crate) fn process(&mut self, env: &mut Environment<'_>, t: u64) {
        let Some(header) = self.header.clone() else {
            return;
        };
        if let Some(mut scheduler) = self.scheduler.take() {
            while let Some(&Reverse((at, rule, k))) = scheduler.invocations.peek() {
                if at > t {
                    break;
                }
                scheduler.invocations.pop();
                self.invoke_rule(env, &header, rule, k, at);
            }
            if scheduler.end <= t {
                trace!(hemisphere = %self.hemisphere, start = scheduler.start, end = t, "scheduler finished");
                write_internal(env.chip, self.hemisphere, header.status, PpuCommand::Idle.word());
            } else {
                self.scheduler = Some(scheduler);
            }
        }
        if let Some(mut read) = self.periodic.filter(|p| p.next <= t) {
            self.sample_periodic(env, &header, read.start, t);
            read.next = t + periodic::SAMPLE_PERIOD_CYCLES;
            self.periodic = Some(read);
        }
    }

    fn execute(&mut self, env: &mut Environment<'_>, command: PpuCommand, t: u64) {
        let Some(mut header) = self.header.clone() else {
            return;
        };
        if command == PpuCommand::Scheduler {
            // The rule table may differ per realtime column.
            match PpuImageHeader::decode(&env.chip.ppu_memory[self.hemisphere.value()]) {
                Ok(current) => {
                    header = current.clone();
                    self.header = Some(current);
                }
                Err(err) => warn!(hemisphere = %self.hemisphere, %err, "rule table unreadable"),
            }
        }
        trace!(hemisphere = %self.hemisphere, ?command, t, "PPU command");
        let mut finished = true;
        match command {
            PpuCommand::Idle => return,
            PpuCommand::BaselineRead => self.baseline = Some(self.cadc_row(env, t)),
            PpuCommand::Read => {
                let mut row = self.cadc_row(env, t);
                if let Some(baseline) = &self.baseline {
                    for (value, base) in row.iter_mut().zip(baseline) {
                        *value = value.saturating_sub(*base);
                    }
                }
                let words = ppu::bytes_to_words(&ppu::to_vector_unit_row(&row));
                for (i, word) in words.into_iter().enumerate() {
                    write_internal(env.chip, self.hemisphere, header.cadc_result + index(i), word);
                }
            }
            PpuCommand::ResetNeurons => {
                let memory = &env.chip.ppu_memory[self.hemisphere.value()];
                let mask_words: Vec<u32> = (0..NeuronColumn::SIZE / 32)
                    .map(|i| memory.get(header.neuron_reset_mask as usize + i).copied().unwrap_or(0))
                    .collect();
                for column in NeuronColumn::iter_all() {
                    if mask_words[column.value() / 32] >> (column.value() % 32) & 1 == 1 {
                        let neuron = AtomicNeuron::new(self.hemisphere, column);
                        env.network.reset_neuron(env.chip, neuron, t);
                    }
                }
            }
            PpuCommand::Scheduler => {
                let runtime = env.chip.ppu_memory[self.hemisphere.value()]
                    .get(header.runtime as usize)
                    .copied()
                    .unwrap_or(0);
                let end = t + u64::from(runtime) / 2;
                let mut invocations = BinaryHeap::new();
                for (i, rule) in header.rules.iter().enumerate() {
                    for k in 0..rule.num_periods {
                        let offset =
                            (u64::from(rule.timer_start) + u64::from(k) * u64::from(rule.period)) / 2;
                        if t + offset < end {
                            invocations.push(Reverse((t + offset, i, k)));
                        } else {
                            increment_internal(env.chip, self.hemisphere, header.scheduler_event_drop_count);
                        }
                    }
                }
                self.scheduler = Some(Scheduler {
                    start: t,
                    end,
                    invocations,
                });
                finished = false;
            }
            PpuCommand::PeriodicRead => {
                if header.flags & image::flag::PERIODIC_CADC == 0 {
                    warn!(hemisphere = %self.hemisphere, "periodic CADC requested but not compiled in");
                } else {
                    self.periodic = Some(PeriodicRead {
                        start: t,
                        next: t + self.ppu_wait_cycles,
                    });
                }
            }
            PpuCommand::StopPeriodicRead => self.periodic = None,
            PpuCommand::Stop => {
                write_internal(env.chip, self.hemisphere, header.stopped, 1);
                debug!(hemisphere = %self.hemisphere, "PPU stopped");
                self.halt();
                return;
            }
        }
        if finished {
            write_internal(env.chip, self.hemisphere, header.status, PpuCommand::Idle.word());
        }
    }

    fn cadc_row(&self, env: &Environment<'_>, t: u64) -> Vec<i8> {
        let chip: &Chip = &*env.chip;
        let enabled = chip.cadc[self.hemisphere.value()].enable;
        NeuronColumn::iter_all()
            .map(|column| {
                if enabled {
                    env.network
                        .level_i8(chip, AtomicNeuron::new(self.hemisphere, column), t)
                } else {
                    0
                }
            })
            .collect()
    }

    #[allow(clippy::cast_sign_loss)]
    fn invoke_rule(
        &self,
        env: &mut Environment<'_>,
        header: &PpuImageHeader,
        rule_index: usize,
        k: u32,
        t: u64,
    ) {
        let rule = header.rules[rule_index];
        let size = rule.recording_size as usize;
        let base = (match self.hemisphere {
            Hemisphere::Top => rule.recording_top,
            Hemisphere::Bottom => rule.recording_bottom,
        }) as usize;
        let row = self.cadc_row(env, t);
        let observed = |j: usize| row[(rule.first_column as usize + j) % NeuronColumn::SIZE] as u8;
        let (offset, record) = match rule.recording {
            RecordingKind::None => return,
            RecordingKind::Raw => (base, (0..size).map(observed).collect::<Vec<u8>>()),
            RecordingKind::Timed => {
                let mut record = (2 * t).to_be_bytes().to_vec();
                record.extend((0..size.saturating_sub(record.len())).map(observed));
                record.truncate(size);
                (base + (rule.first_period + k) as usize * size, record)
            }
        };
        if !write_bytes(&mut env.chip.external_ppu_memory, offset, &record) {
            increment_internal(
                env.chip,
                self.hemisphere,
                header.timer_event_drop_count + index(rule_index),
            );
        }
    }

    /// Samples beyond the buffer capacity are only counted in the buffer
    /// header, so the host can tell how many were lost.
    fn sample_periodic(&self, env: &mut Environment<'_>, header: &PpuImageHeader, start: u64, t: u64) {
        let h = self.hemisphere.value();
        let offset_word = header.periodic_cadc_readout_memory_offset as usize;
        let sample = env.chip.ppu_memory[h].get(offset_word).copied().unwrap_or(0);
        let stored = sample < header.num_periodic_cadc_samples;
        let timestamp = 2 * ((t - start) + u64::from(header.periodic_cadc_fpga_wait_clock_cycles));
        let row = ppu::to_vector_unit_row(&self.cadc_row(env, t));
        let buffer = header.periodic_cadc_samples[h] as usize;
        let at = buffer + periodic::sample_offset(sample as usize);
        let count = (sample + 1).to_be_bytes();

        let written = if header.flags & image::flag::PERIODIC_CADC_ON_DRAM != 0 {
            let dram = &mut *env.dram;
            (!stored
                || dram.write_bytes(at, &timestamp.to_be_bytes())
                    && dram.write_bytes(at + periodic::ROW_OFFSET, &row))
                && dram.write_bytes(buffer, &count)
        } else {
            let memory = &mut env.chip.external_ppu_memory;
            (!stored
                || write_bytes(memory, at, &timestamp.to_be_bytes())
                    && write_bytes(memory, at + periodic::ROW_OFFSET, &row))
                && write_bytes(memory, buffer, &count)
        };
        if written {
            write_internal(env.chip, self.hemisphere, header.periodic_cadc_readout_memory_offset, sample + 1);
        } else {
            warn!(hemisphere = %self.hemisphere, sample, "periodic CADC sample outside memory");
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn index(i: usize) -> u32 {
    i as u32
}

fn write_internal(chip: &mut Chip, hemisphere: Hemisphere, offset: u32, value: u32) {
    if let Some(word) = chip.ppu_memory[hemisphere.value()].get_mut(offset as usize) {
        *word = value;
    }
}

fn increment_internal(chip: &mut Chip, hemisphere: Hemisphere, offset: u32) {
    if let Some(word) = chip.ppu_memory[hemisphere.value()].get_mut(offset as usize) {
        *word = word.wrapping_add(1);
    }
}

fn write_bytes(memory: &mut [u8], offset: usize, bytes: &[u8]) -> bool {
    match memory.get_mut(offset..offset + bytes.len()) {
        Some(target) => {
            target.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow_hw::ppu::PpuRuleEntry;

    const STATUS: u32 = 200;
    const STOPPED: u32 = 201;
    const RUNTIME: u32 = 202;
    const CADC_RESULT: u32 = 256;
    const RESET_MASK: u32 = 320;
    const DROPS: u32 = 330;
    const TIMER_DROPS: u32 = 331;
    const READOUT_OFFSET: u32 = 340;

    fn image(rules: Vec<PpuRuleEntry>, flags: u32) -> Chip {
        let header = PpuImageHeader {
            flags,
            num_periodic_cadc_samples: 3,
            status: STATUS,
            cadc_result: CADC_RESULT,
            runtime: RUNTIME,
            neuron_reset_mask: RESET_MASK,
            mailbox: 400,
            scheduler_event_drop_count: DROPS,
            stopped: STOPPED,
            ppu: 203,
            periodic_cadc_samples: [0, 4096],
            timer_event_drop_count: TIMER_DROPS,
            periodic_cadc_readout_memory_offset: READOUT_OFFSET,
            periodic_cadc_fpga_wait_clock_cycles: 1000,
            rules,
        };
        let mut chip = Chip::default();
        for memory in &mut chip.ppu_memory {
            let words = header.encode();
            memory[..words.len()].copy_from_slice(&words);
        }
        chip.cadc = [sigflow_hw::chip::CadcConfig {
            enable: true,
            ..Default::default()
        }; 2];
        chip
    }

    fn command(ppu: &mut SimulatedPpu, env: &mut Environment<'_>, command: PpuCommand, t: u64) {
        env.chip.ppu_memory[0][STATUS as usize] = command.word();
        ppu.on_memory_write(env, STATUS as usize, t);
    }

    fn run(ppu: &mut SimulatedPpu, env: &mut Environment<'_>, end: u64) {
        while let Some(t) = ppu.next_event_time().filter(|&t| t <= end) {
            ppu.process(env, t);
        }
    }

    #[test]
    fn boot_requires_image() {
        let mut chip = Chip::default();
        let mut ppu = SimulatedPpu::new(Hemisphere::Top, &HardwareParameters::default());
        ppu.boot(&mut chip);
        assert!(!ppu.is_running());
        assert_eq!(ppu.status_register(), STATUS_SLEEP);

        let mut chip = image(Vec::new(), 0);
        chip.ppu_memory[0][STATUS as usize] = 99;
        ppu.boot(&mut chip);
        assert!(ppu.is_running());
        assert_eq!(chip.ppu_memory[0][STATUS as usize], 0);
    }

    #[test]
    fn read_subtracts_baseline() {
        let mut chip = image(Vec::new(), 0);
        let mut network = Network::new(0);
        let mut dram = Dram::default();
        let mut ppu = SimulatedPpu::new(Hemisphere::Top, &HardwareParameters::default());
        ppu.boot(&mut chip);
        chip.capmem[0].set_leak(NeuronColumn::new(0), 512 + 4 * 10);
        let mut env = Environment {
            chip: &mut chip,
            network: &mut network,
            dram: &mut dram,
        };
        command(&mut ppu, &mut env, PpuCommand::BaselineRead, 0);
        command(&mut ppu, &mut env, PpuCommand::Read, 1_000_000);

        let start = CADC_RESULT as usize;
        let words = &chip.ppu_memory[0][start..start + 64];
        let values = ppu::from_vector_unit_row(&ppu::words_to_bytes(words));
        assert_eq!(values[0], 10);
        assert_eq!(values[1], 0);
        assert_eq!(chip.ppu_memory[0][STATUS as usize], PpuCommand::Idle.word());
    }

    #[test]
    fn scheduler_records_timed_samples_and_returns_to_idle() {
        let rule = PpuRuleEntry {
            id: 0,
            timer_start: 200,
            period: 400,
            num_periods: 4,
            recording: RecordingKind::Timed,
            recording_size: 16,
            recording_top: 1024,
            recording_bottom: 2048,
            first_period: 1,
            first_column: 0,
        };
        let mut chip = image(vec![rule], 0);
        chip.ppu_memory[0][RUNTIME as usize] = 1200;
        let mut network = Network::new(0);
        let mut dram = Dram::default();
        let mut ppu = SimulatedPpu::new(Hemisphere::Top, &HardwareParameters::default());
        ppu.boot(&mut chip);
        let mut env = Environment {
            chip: &mut chip,
            network: &mut network,
            dram: &mut dram,
        };
        command(&mut ppu, &mut env, PpuCommand::Scheduler, 100);
        assert_eq!(env.chip.ppu_memory[0][STATUS as usize], PpuCommand::Scheduler.word());
        run(&mut ppu, &mut env, 10_000);

        assert_eq!(chip.ppu_memory[0][STATUS as usize], PpuCommand::Idle.word());
        // invocations at 100 + {100, 300, 500}; the fourth lies beyond runtime
        assert_eq!(chip.ppu_memory[0][DROPS as usize], 1);
        for (k, t) in [(0usize, 200u64), (1, 400), (2, 600)] {
            let at = 1024 + (1 + k) * 16;
            let stamp: [u8; 8] = chip.external_ppu_memory[at..at + 8].try_into().unwrap();
            assert_eq!(u64::from_be_bytes(stamp), 2 * t);
        }
    }

    #[test]
    fn scheduler_reads_rule_table_changed_after_boot() {
        let rule = PpuRuleEntry {
            id: 3,
            timer_start: 0,
            period: 100,
            num_periods: 2,
            ..PpuRuleEntry::default()
        };
        let mut chip = image(vec![rule], 0);
        chip.ppu_memory[0][RUNTIME as usize] = 10_000;
        let mut network = Network::new(0);
        let mut dram = Dram::default();
        let mut ppu = SimulatedPpu::new(Hemisphere::Top, &HardwareParameters::default());
        ppu.boot(&mut chip);

        let changed = PpuRuleEntry {
            num_periods: 0,
            ..rule
        };
        let words = PpuImageHeader::decode(&chip.ppu_memory[0])
            .map(|h| PpuImageHeader {
                rules: vec![changed],
                ..h
            })
            .unwrap()
            .encode();
        chip.ppu_memory[0][..words.len()].copy_from_slice(&words);

        let mut env = Environment {
            chip: &mut chip,
            network: &mut network,
            dram: &mut dram,
        };
        command(&mut ppu, &mut env, PpuCommand::Scheduler, 0);
        assert_eq!(ppu.scheduler.as_ref().map(|s| s.invocations.len()), Some(0));
        run(&mut ppu, &mut env, 20_000);
        assert_eq!(chip.ppu_memory[0][STATUS as usize], PpuCommand::Idle.word());
    }

    #[test]
    fn periodic_read_counts_samples_beyond_capacity() {
        let mut chip = image(Vec::new(), image::flag::PERIODIC_CADC);
        let mut network = Network::new(0);
        let mut dram = Dram::default();
        let params = HardwareParameters::default();
        let mut ppu = SimulatedPpu::new(Hemisphere::Top, &params);
        ppu.boot(&mut chip);
        let mut env = Environment {
            chip: &mut chip,
            network: &mut network,
            dram: &mut dram,
        };
        command(&mut ppu, &mut env, PpuCommand::PeriodicRead, 0);
        run(&mut ppu, &mut env, 5000);
        command(&mut ppu, &mut env, PpuCommand::StopPeriodicRead, 5000);
        assert!(ppu.next_event_time().is_none());

        // samples at 1000, 1250, ..., 5000
        assert_eq!(chip.ppu_memory[0][READOUT_OFFSET as usize], 17);
        assert_eq!(&chip.external_ppu_memory[0..4], &17u32.to_be_bytes());
        let first = periodic::sample_offset(0);
        let stamp: [u8; 8] = chip.external_ppu_memory[first..first + 8].try_into().unwrap();
        let ppu_wait = u64::from(params.periodic_cadc_ppu_wait_clock_cycles) / 2;
        assert_eq!(u64::from_be_bytes(stamp), 2 * (ppu_wait + 1000));
        let beyond = periodic::sample_offset(3);
        assert!(chip.external_ppu_memory[beyond..beyond + 8].iter().all(|&b| b == 0));
    }

    #[test]
    fn stop_sets_stopped_and_sleeps() {
        let mut chip = image(Vec::new(), 0);
        let mut network = Network::new(0);
        let mut dram = Dram::default();
        let mut ppu = SimulatedPpu::new(Hemisphere::Top, &HardwareParameters::default());
        ppu.boot(&mut chip);
        let mut env = Environment {
            chip: &mut chip,
            network: &mut network,
            dram: &mut dram,
        };
        command(&mut ppu, &mut env, PpuCommand::Stop, 10);
        assert_eq!(chip.ppu_memory[0][STOPPED as usize], 1);
        assert_eq!(ppu.status_register(), STATUS_SLEEP);
    }
}
