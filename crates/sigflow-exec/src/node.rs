//! Execution of one execution instance on its chip.
//!
//! A node pre-processes every realtime column, compiles the shared PPU
//! program, derives one chip configuration per column and assembles a
//! single [`ChipProgram`]:
//!
//! ```text
//!  pre_realtime hook, health
//!  for each batch entry:
//!      column 0 ─ config diff ─ column 1 ─ … ─ column n-1   (periodic finalize after a span)
//!      symbol reads, inter-batch wait
//!  post_realtime hook, health, PPU stop
//! ```
//!
//! Between batch entries the chip is brought back to the first column's
//! configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use sigflow_backend::generator::{ppu_stop, set_instruction_timeout};
use sigflow_backend::{ChipProgram, StatefulConnection};
use sigflow_core::{
    DataSnippet, ExecutionHealthInfo, ExecutionInstanceHooks, ExecutionInstanceId, Graph,
    InputData, OutputData, PpuSymbolReadout,
};
use sigflow_hw::address;
use sigflow_hw::ppu::{PpuCommand, periodic};
use sigflow_hw::{
    Address, Chip, FpgaTime, HardwareParameters, HealthSnapshot, Hemisphere, PlaybackProgram,
    PlaybackProgramBuilder, Ticket, Word,
};

use crate::config_visitor::ConfigVisitor;
use crate::error::{ExecutionError, Result};
use crate::ppu_program::{PeriodicLayout, PpuProgram, PpuUsage, SymbolRead};
use crate::snippet::decode::{self, PeriodicSample};
use crate::snippet::{ColumnContext, EntryProgram, RealtimeSnippet, Recorded, Usages};

/// One periodic CADC sampling span of a batch entry.
#[derive(Debug)]
struct PeriodicSpan {
    start: Ticket,
    buffers: [Option<Ticket>; 2],
}

/// Everything needed to run one execution instance.
#[derive(Debug)]
pub struct ExecutionInstanceNode<'a> {
    execution_instance: ExecutionInstanceId,
    graphs: &'a [Graph],
    configs: Vec<&'a Chip>,
    input: &'a InputData,
    hooks: Option<&'a ExecutionInstanceHooks>,
    connection: &'a StatefulConnection,
}

impl<'a> ExecutionInstanceNode<'a> {
    /// Node for `execution_instance`; `configs` holds one configuration
    /// per graph.
    pub fn new(
        execution_instance: ExecutionInstanceId,
        graphs: &'a [Graph],
        configs: Vec<&'a Chip>,
        input: &'a InputData,
        hooks: Option<&'a ExecutionInstanceHooks>,
        connection: &'a StatefulConnection,
    ) -> Self {
        Self {
            execution_instance,
            graphs,
            configs,
            input,
            hooks: hooks.filter(|h| !h.is_empty()),
            connection,
        }
    }

    /// Execution instance run by this node.
    pub fn execution_instance(&self) -> ExecutionInstanceId {
        self.execution_instance
    }

    /// Runs the execution instance.
    ///
    /// `upstream` holds, per realtime column, the outputs of all execution
    /// instances this one depends on.
    #[allow(clippy::too_many_lines)]
    pub fn run(&self, upstream: &[DataSnippet]) -> Result<OutputData> {
        let ei = self.execution_instance;
        let params = self.connection.params();
        let columns = self.graphs.len();
        if self.configs.len() != columns {
            return Err(ExecutionError::Logic(format!(
                "{ei}: {} configurations for {columns} realtime columns",
                self.configs.len()
            )));
        }
        let batch_size = self.input.batch_size()?.max(1);
        let empty = DataSnippet::default();

        let mut usage = PpuUsage::new(columns);
        let mut snippets = Vec::with_capacity(columns);
        for (column, graph) in self.graphs.iter().enumerate() {
            let mut snippet = RealtimeSnippet::new(graph, ei, column, params, batch_size);
            snippet.pre_process(
                self.input.snippets.get(column).unwrap_or(&empty),
                upstream.get(column).unwrap_or(&empty),
                &mut usage,
            )?;
            snippets.push(snippet);
        }
        let usages: Vec<Usages> = snippets.iter().map(RealtimeSnippet::usages).collect();
        let margin = params.wait_before_realtime + params.wait_after_realtime;
        usage.add_periodic_duration(
            snippets
                .iter()
                .filter(|s| s.usages().uses_periodic())
                .fold(FpgaTime::ZERO, |sum, s| sum + s.max_duration() + margin),
        );

        let ppu = if usage.is_empty() {
            None
        } else {
            Some(PpuProgram::compile(&usage, params)?)
        };
        let hooks = self.hooks;
        if let Some(hooks) = hooks {
            let accesses_symbols =
                !hooks.write_ppu_symbols.is_empty() || !hooks.read_ppu_symbols.is_empty();
            if accesses_symbols && ppu.is_none() {
                return Err(ExecutionError::NoPpuProgram(ei));
            }
        }

        let mut dram = None;
        let mut configs = Vec::with_capacity(columns);
        for (column, (graph, snippet)) in self.graphs.iter().zip(&snippets).enumerate() {
            let mut chip = ConfigVisitor::new(graph, ei).apply(self.configs[column].clone())?;
            if let Some(ppu) = &ppu {
                ppu.apply(&mut chip, column, snippet.reset_mask());
                if let Some(hooks) = hooks {
                    ppu.write_symbols(&hooks.write_ppu_symbols, &mut chip, &mut dram)?;
                }
            }
            configs.push(chip);
        }

        let mut entries = Vec::with_capacity(columns);
        for (column, snippet) in snippets.iter().enumerate() {
            let context = ColumnContext {
                before: column.checked_sub(1).map(|c| usages[c]).unwrap_or_default(),
                after: usages.get(column + 1).copied().unwrap_or_default(),
                ppu: ppu.as_ref(),
                hooks,
            };
            entries.push(snippet.generate(&context)?);
        }

        let forward: Vec<Vec<(Address, Word)>> = configs
            .windows(2)
            .map(|pair| config_diff(&pair[0], &pair[1]))
            .collect();
        let restore = match configs.as_slice() {
            [first, .., last] => config_diff(last, first),
            _ => Vec::new(),
        };

        let mut segments = Vec::new();
        let mut head = PlaybackProgramBuilder::new();
        if let Some(hooks) = hooks {
            head.copy_back(&hooks.pre_realtime);
        }
        let health_before = HealthSnapshot::read(&mut head);
        segments.push(head);

        let mut spans: Vec<Vec<PeriodicSpan>> = (0..batch_size).map(|_| Vec::new()).collect();
        let mut symbol_reads: Vec<BTreeMap<String, SymbolRead>> = Vec::new();
        for entry in 0..batch_size {
            let mut start = None;
            for column in 0..columns {
                let mut segment = PlaybackProgramBuilder::new();
                if column > 0 {
                    segment.write_all(forward[column - 1].iter().copied());
                } else if entry > 0 {
                    segment.write_all(restore.iter().copied());
                }
                let program: &mut EntryProgram = &mut entries[column][entry];
                if let Some(ticket) = program.periodic_start() {
                    start = Some(ticket.clone());
                }
                segment.merge_back(&mut program.builder);

                let after = usages.get(column + 1).copied().unwrap_or_default();
                let layout = ppu.as_ref().and_then(PpuProgram::periodic);
                if let (Some(ppu), Some(layout)) = (&ppu, layout) {
                    if usages[column].uses_periodic() && !after.uses_periodic() {
                        let start = start.take().ok_or_else(|| {
                            ExecutionError::Logic(format!(
                                "{ei}: periodic CADC span ends in column {column} without a start"
                            ))
                        })?;
                        let buffers = finalize_periodic(&mut segment, ppu, layout, params)?;
                        spans[entry].push(PeriodicSpan { start, buffers });
                    }
                }
                segments.push(segment);
            }

            let mut tail = PlaybackProgramBuilder::new();
            if let (Some(ppu), Some(hooks)) = (&ppu, hooks) {
                if !hooks.read_ppu_symbols.is_empty() {
                    symbol_reads.push(ppu.read_symbols(&hooks.read_ppu_symbols, &mut tail)?);
                }
            }
            if entry + 1 < batch_size {
                if let Some(&wait) = self.input.inter_batch_entry_wait.get(&ei) {
                    tail.wait_until(wait);
                }
            }
            segments.push(tail);
        }

        let mut last = PlaybackProgramBuilder::new();
        if let Some(hooks) = hooks {
            last.copy_back(&hooks.post_realtime);
        }
        let health_after = HealthSnapshot::read(&mut last);
        if let Some(ppu) = &ppu {
            last.merge_back(&mut ppu_stop(ppu.symbols())?);
        }
        segments.push(last);

        let programs = pack(segments, self.connection.playback_memory_size());
        debug!(
            %ei,
            columns,
            batch_size,
            programs = programs.len(),
            ppu = ppu.is_some(),
            "generated playback programs"
        );

        let mut program = ChipProgram {
            chip: ei.chip.chip,
            chip_configs: configs,
            programs,
            ppu_symbols: ppu.as_ref().map(|p| p.symbols().clone()),
            external_ppu_dram_memory_config: dram,
            pre_initial_config_hook: hooks
                .map(|h| {
                    let mut builder = PlaybackProgramBuilder::new();
                    builder.copy_back(&h.pre_static_config);
                    builder
                })
                .unwrap_or_default(),
            has_hooks_around_realtime: hooks
                .is_some_and(|h| !h.pre_realtime.is_empty() || !h.post_realtime.is_empty()),
        };
        let hardware = self.connection.run(&mut program)?;
        info!(%ei, ?hardware, "executed on hardware");

        let mut spikes: Vec<_> = program
            .programs
            .iter()
            .flat_map(|p| p.spikes().iter().copied())
            .collect();
        spikes.sort_by_key(|s| s.chip_time.value());
        let mut madc: Vec<_> = program
            .programs
            .iter()
            .flat_map(|p| p.madc_samples().iter().copied())
            .collect();
        madc.sort_by_key(|s| s.chip_time.value());
        let periodic = decode_spans(&spans, ppu.as_ref().and_then(PpuProgram::periodic), params)?;
        let recorded = Recorded {
            spikes: &spikes,
            madc: &madc,
            periodic: &periodic,
        };

        let mut output = OutputData::default();
        let mut realtime = Duration::ZERO;
        for (snippet, entries) in snippets.iter_mut().zip(&entries) {
            let (data, duration) = snippet.post_process(entries, &recorded, ppu.as_ref())?;
            output.snippets.push(data);
            realtime += duration;
        }
        if let Some(first) = program.chip_configs.into_iter().next() {
            output.pre_execution_chips.insert(ei, first);
        }
        output
            .time_info
            .execution_duration_per_hardware
            .insert(ei.chip, hardware);
        output
            .time_info
            .realtime_duration_per_execution_instance
            .insert(ei, realtime);

        let before = HealthSnapshot::from_ticket(&health_before)?;
        let after = HealthSnapshot::from_ticket(&health_after)?;
        let health = after.since(&before);
        if health.total_drops() > 0 {
            warn!(%ei, drops = health.total_drops(), "hardware dropped events during execution");
        }
        output.health_info = Some(ExecutionHealthInfo {
            execution_instances: BTreeMap::from([(ei, health)]),
        });
        output.read_ppu_symbols = symbol_reads
            .iter()
            .map(|reads| -> Result<PpuSymbolReadout> {
                let values = reads
                    .iter()
                    .map(|(name, read)| Ok((name.clone(), read.value()?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(BTreeMap::from([(ei, values)]))
            })
            .collect::<Result<_>>()?;
        Ok(output)
    }
}

/// Writes turning configuration `from` into `to`.
fn config_diff(from: &Chip, to: &Chip) -> Vec<(Address, Word)> {
    from.encode()
        .into_iter()
        .zip(to.encode())
        .filter(|(old, new)| old.1 != new.1)
        .map(|(_, new)| new)
        .collect()
}

/// Waits for the PPUs to leave the periodic readout, reads the sample
/// buffers and rearms them for the next span.
fn finalize_periodic(
    builder: &mut PlaybackProgramBuilder,
    ppu: &PpuProgram,
    layout: &PeriodicLayout,
    params: &HardwareParameters,
) -> Result<[Option<Ticket>; 2]> {
    let status = ppu.internal("status")?;
    let offset = ppu.internal("periodic_cadc_readout_memory_offset")?;
    let hemispheres: Vec<Hemisphere> = Hemisphere::iter_all()
        .filter(|h| layout.buffers[h.value()].is_some())
        .collect();

    set_instruction_timeout(builder, params.ppu_finish_timeout);
    for &hemisphere in &hemispheres {
        builder.barrier();
        builder.poll_until(
            address::ppu_memory(hemisphere, status.offset),
            u32::MAX,
            PpuCommand::Idle.word(),
        );
    }
    set_instruction_timeout(builder, params.default_instruction_timeout);

    let words = periodic::buffer_bytes(layout.capacity) / 4;
    let mut tickets = [None, None];
    for &hemisphere in &hemispheres {
        let Some(buffer) = layout.buffers[hemisphere.value()] else {
            continue;
        };
        let first = if layout.on_dram {
            address::external_dram(buffer)
        } else {
            address::external_ppu_memory(buffer)
        };
        tickets[hemisphere.value()] = Some(builder.read(first, words));
        builder.write(first, Word(0));
        builder.write(address::ppu_memory(hemisphere, offset.offset), Word(0));
    }
    Ok(tickets)
}

fn decode_spans(
    spans: &[Vec<PeriodicSpan>],
    layout: Option<&PeriodicLayout>,
    params: &HardwareParameters,
) -> Result<Vec<[Vec<PeriodicSample>; 2]>> {
    spans
        .iter()
        .map(|spans| {
            let mut samples: [Vec<PeriodicSample>; 2] = Default::default();
            let Some(layout) = layout else {
                return Ok(samples);
            };
            for span in spans {
                let start = span.start.fpga_time()?;
                for (samples, ticket) in samples.iter_mut().zip(&span.buffers) {
                    if let Some(ticket) = ticket {
                        samples.extend(decode::periodic_samples(
                            &ticket.bytes()?,
                            start,
                            params.periodic_cadc_fpga_wait_clock_cycles,
                            layout.capacity,
                        ));
                    }
                }
            }
            Ok(samples)
        })
        .collect()
}

/// Packs segments into programs fitting the playback memory.
///
/// Segments are kept whole where possible; one larger than the memory is
/// split at instruction boundaries.
fn pack(segments: Vec<PlaybackProgramBuilder>, capacity: usize) -> Vec<PlaybackProgram> {
    let mut programs = Vec::new();
    let mut current = PlaybackProgramBuilder::new();
    for mut segment in segments {
        if segment.is_empty() {
            continue;
        }
        let size = segment.size_to_fpga();
        if !current.is_empty() && current.size_to_fpga() + size > capacity {
            programs.push(current.done());
        }
        if size > capacity {
            warn!(
                size,
                capacity, "segment exceeds playback memory, splitting it breaks its timing"
            );
            let mut parts = segment.split(capacity);
            let tail = parts.pop();
            programs.extend(parts.iter_mut().map(PlaybackProgramBuilder::done));
            if let Some(mut tail) = tail {
                current.merge_back(&mut tail);
            }
        } else {
            current.merge_back(&mut segment);
        }
    }
    if !current.is_empty() {
        programs.push(current.done());
    }
    programs
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow_hw::coord::{AtomicNeuron, NeuronColumn};

    fn builder_of(writes: u32) -> PlaybackProgramBuilder {
        let mut builder = PlaybackProgramBuilder::new();
        for i in 0..writes {
            builder.write(Address(i), Word(0));
        }
        builder
    }

    #[test]
    fn packing_keeps_segments_together() {
        let unit = builder_of(1).size_to_fpga();
        let segments = vec![builder_of(2), builder_of(2), PlaybackProgramBuilder::new(), builder_of(3)];
        let programs = pack(segments, 5 * unit);
        let sizes: Vec<usize> = programs.iter().map(|p| p.size_to_fpga() / unit).collect();
        assert_eq!(sizes, vec![4, 3]);
    }

    #[test]
    fn oversized_segments_are_split() {
        let unit = builder_of(1).size_to_fpga();
        let programs = pack(vec![builder_of(1), builder_of(7)], 3 * unit);
        let sizes: Vec<usize> = programs.iter().map(|p| p.size_to_fpga() / unit).collect();
        assert_eq!(sizes, vec![1, 3, 3, 1]);
        assert_eq!(sizes.iter().sum::<usize>(), 8);
    }

    #[test]
    fn config_diff_touches_changed_words_only() {
        let first = Chip::default();
        let mut second = Chip::default();
        second
            .neuron_mut(AtomicNeuron::new(Hemisphere::Bottom, NeuronColumn::new(12)))
            .threshold = 9;
        let diff = config_diff(&first, &second);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, address::neuron(Hemisphere::Bottom, 12));
        assert!(config_diff(&second, &second).is_empty());
        assert_eq!(config_diff(&second, &first)[0].0, diff[0].0);
    }
}
