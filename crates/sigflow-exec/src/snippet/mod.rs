//! One realtime column of one execution instance.
//!
//! ```text
//!   pre_process ──► Usages ──► generate(before, after) ──► EntryProgram per batch entry
//!        │                                                      │ run by the node
//!        └─ host data resolved                                  ▼
//!   post_process ◄──── tickets, recorded events, periodic CADC samples
//! ```
//!
//! Within a batch entry every command is placed at a time relative to the
//! column's timer reset:
//!
//! ```text
//!  0              begin                          end         end + wait_after
//!  ├─ enable ─────┼─ scheduler, spikes ──────────┼───────────┼─ CADC read, disable
//!  │  readouts    │  (inside_realtime hooks)     │           │
//!  └ wait_before ─┘                              └ wait_after┘
//! ```

pub mod decode;

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, trace, warn};

use sigflow_backend::generator::set_instruction_timeout;
use sigflow_core::vertex::{CadcMembraneReadoutView, CadcMode, PlasticityRule, Transformation};
use sigflow_core::{
    DataEntry, DataError, DataSnippet, Edge, ExecutionInstanceHooks, ExecutionInstanceId, Graph,
    TimedData, TimedDataSequence, TimedMadcSampleFromChip, TimedSpikeFromChip, Vertex, VertexId,
};
use sigflow_hw::address::{self, NEURON_RESET_WORDS, map};
use sigflow_hw::ppu::{PpuCommand, RecordingKind, from_vector_unit_row};
use sigflow_hw::{
    AbsoluteTimePlaybackProgramBuilder, Address, FpgaTime, HardwareParameters, Hemisphere,
    MadcSampleFromChip, PlaybackProgramBuilder, SpikeFromChip, Ticket, TimedSpikeToChip, Word,
};

use crate::error::{ExecutionError, Result};
use crate::ppu_program::{MAILBOX_WORDS, NeuronResetMask, PpuProgram, PpuUsage};
use decode::{Interval, PeriodicSample};

/// MADC control word arming and starting a recording.
const MADC_ARM_AND_START: u32 = 0b11;
/// MADC control word stopping a recording.
const MADC_STOP: u32 = 0b100;

/// Hardware resources a realtime column keeps busy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usages {
    /// MADC recording.
    pub madc: bool,
    /// Event recording towards the host, carrying spikes and MADC samples.
    pub event_recording: bool,
    /// Hagen-mode CADC readout per hemisphere.
    pub hagen: [bool; 2],
    /// Periodic CADC sampling per hemisphere.
    pub periodic: [bool; 2],
    /// Plasticity rules.
    pub plasticity: bool,
}

impl Usages {
    /// Whether any hemisphere samples periodically.
    pub fn uses_periodic(&self) -> bool {
        self.periodic.iter().any(|&p| p)
    }

    /// Whether any readout or rule is active.
    pub fn any(&self) -> bool {
        self.madc
            || self.event_recording
            || self.plasticity
            || self.uses_periodic()
            || self.hagen.iter().any(|&h| h)
    }
}

/// Neighbourhood of a column within a batch entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnContext<'a> {
    /// Usages of the preceding column; default for the first.
    pub before: Usages,
    /// Usages of the following column; default for the last.
    pub after: Usages,
    /// PPU program of the execution instance.
    pub ppu: Option<&'a PpuProgram>,
    /// Hooks, only for single-column executions.
    pub hooks: Option<&'a ExecutionInstanceHooks>,
}

/// Read results of one batch entry.
#[derive(Clone, Debug, Default)]
pub struct EntryTickets {
    begin: Option<Ticket>,
    end: Option<Ticket>,
    periodic_start: Option<Ticket>,
    ppu_status: Vec<Ticket>,
    scheduler_drops: Vec<Ticket>,
    timer_drops: Vec<(u32, Ticket)>,
    mailbox: Vec<Ticket>,
    cadc: [Option<Ticket>; 2],
    recordings: BTreeMap<u32, [Ticket; 2]>,
}

/// Instructions and read tickets of one batch entry of one column.
#[derive(Debug, Default)]
pub struct EntryProgram {
    /// Timer reset, realtime commands and PPU finish.
    pub builder: PlaybackProgramBuilder,
    tickets: EntryTickets,
}

impl EntryProgram {
    /// Marker read taken when periodic CADC sampling was started.
    pub fn periodic_start(&self) -> Option<&Ticket> {
        self.tickets.periodic_start.as_ref()
    }

    /// Realtime interval, unless the entry had nothing to execute.
    pub fn interval(&self, runtime: Option<FpgaTime>) -> Result<Option<Interval>> {
        match (&self.tickets.begin, &self.tickets.end) {
            (Some(begin), Some(end)) => Ok(Some(Interval {
                begin: begin.fpga_time()?,
                end: end.fpga_time()?,
                runtime,
            })),
            _ => Ok(None),
        }
    }
}

/// Data recorded over all programs of an execution instance.
#[derive(Clone, Copy, Debug)]
pub struct Recorded<'a> {
    /// Spikes sorted by chip time.
    pub spikes: &'a [SpikeFromChip],
    /// MADC samples sorted by chip time.
    pub madc: &'a [MadcSampleFromChip],
    /// Periodic CADC samples per batch entry and hemisphere.
    pub periodic: &'a [[Vec<PeriodicSample>; 2]],
}

/// Pre-processing, generation and decoding of one realtime column.
#[derive(Debug)]
pub struct RealtimeSnippet<'a> {
    graph: &'a Graph,
    execution_instance: ExecutionInstanceId,
    column: usize,
    params: &'a HardwareParameters,
    batch_size: usize,
    runtime: Vec<Option<FpgaTime>>,
    data: BTreeMap<VertexId, DataEntry>,
    deferred: Vec<VertexId>,
    usages: Usages,
    reset_mask: NeuronResetMask,
    rules: Vec<PlasticityRule>,
    spikes: Vec<Vec<TimedSpikeToChip>>,
}

impl<'a> RealtimeSnippet<'a> {
    /// Column `column` of `execution_instance` in `graph`.
    pub fn new(
        graph: &'a Graph,
        execution_instance: ExecutionInstanceId,
        column: usize,
        params: &'a HardwareParameters,
        batch_size: usize,
    ) -> Self {
        Self {
            graph,
            execution_instance,
            column,
            params,
            batch_size,
            runtime: vec![None; batch_size],
            data: BTreeMap::new(),
            deferred: Vec::new(),
            usages: Usages::default(),
            reset_mask: NeuronResetMask::default(),
            rules: Vec::new(),
            spikes: vec![Vec::new(); batch_size],
        }
    }

    /// Resources used, valid after [`pre_process`](Self::pre_process).
    pub fn usages(&self) -> Usages {
        self.usages
    }

    /// Neurons reset at the interval begin.
    pub fn reset_mask(&self) -> &NeuronResetMask {
        &self.reset_mask
    }

    /// Length of the realtime interval of batch entry `entry`.
    pub fn duration(&self, entry: usize) -> FpgaTime {
        let last_spike = self.spikes[entry]
            .iter()
            .map(|s| s.time)
            .max()
            .unwrap_or(FpgaTime::ZERO);
        self.runtime[entry].unwrap_or(FpgaTime::ZERO).max(last_spike)
    }

    /// Longest realtime interval over all batch entries.
    pub fn max_duration(&self) -> FpgaTime {
        (0..self.batch_size)
            .map(|b| self.duration(b))
            .max()
            .unwrap_or(FpgaTime::ZERO)
    }

    /// Resolves host data available before execution and records which
    /// vertices need hardware results.
    ///
    /// `input` is this column's input snippet, `upstream` holds values
    /// produced by preceding execution instances.
    pub fn pre_process(
        &mut self,
        input: &DataSnippet,
        upstream: &DataSnippet,
        ppu: &mut PpuUsage,
    ) -> Result<Usages> {
        for (entry, runtimes) in self.runtime.iter_mut().zip(&input.runtime) {
            *entry = runtimes.get(&self.execution_instance).copied();
        }
        let graph = self.graph;
        for id in graph.local_topological_order(self.execution_instance) {
            let vertex = graph.vertex_property(id)?;
            ppu.add_vertex(self.column, vertex)?;
            match vertex {
                Vertex::ExternalInput(_) => {
                    let entry = input.data.get(&id).ok_or(ExecutionError::MissingData {
                        vertex: id,
                        column: self.column,
                    })?;
                    self.check_batch_size(entry)?;
                    self.data.insert(id, entry.clone());
                }
                Vertex::DataInput(_) => {
                    let edge = self.single_input(id)?;
                    let entry = self.lookup(&edge, upstream)?.ok_or(ExecutionError::MissingData {
                        vertex: id,
                        column: self.column,
                    })?;
                    self.check_batch_size(&entry)?;
                    self.data.insert(id, entry);
                }
                Vertex::Transformation(transformation) => {
                    if !self.transform(id, transformation, upstream)? {
                        self.deferred.push(id);
                    }
                }
                Vertex::CrossbarL2Input(_) => self.collect_spikes(id)?,
                Vertex::NeuronView(view) => {
                    for (column, config) in view.columns().iter().zip(view.configs()) {
                        if config.enable_reset {
                            let c = column.value();
                            self.reset_mask[view.row().value()][c / 32] |= 1 << (c % 32);
                        }
                    }
                }
                Vertex::CrossbarL2Output(_) => {
                    self.usages.event_recording = true;
                    self.deferred.push(id);
                }
                Vertex::MadcReadoutView(_) => {
                    // MADC samples reach the host through the event recording path.
                    self.usages.madc = true;
                    self.usages.event_recording = true;
                    self.deferred.push(id);
                }
                Vertex::CadcMembraneReadoutView(view) => {
                    let h = view.synram().value();
                    match view.mode() {
                        CadcMode::Hagen => self.usages.hagen[h] = true,
                        CadcMode::Periodic | CadcMode::PeriodicOnDram => {
                            self.usages.periodic[h] = true;
                        }
                    }
                    self.deferred.push(id);
                }
                Vertex::PlasticityRule(rule) => {
                    self.usages.plasticity = true;
                    self.rules.push(rule.clone());
                    self.deferred.push(id);
                }
                Vertex::DataOutput(_) => self.deferred.push(id),
                _ => {}
            }
        }
        trace!(
            ei = %self.execution_instance,
            column = self.column,
            deferred = self.deferred.len(),
            usages = ?self.usages,
            "pre-processed realtime column"
        );
        Ok(self.usages)
    }

    fn check_batch_size(&self, entry: &DataEntry) -> Result<()> {
        if entry.batch_size() != self.batch_size {
            return Err(DataError::SizeMismatch {
                what: "batch size",
                left: entry.batch_size(),
                right: self.batch_size,
            }
            .into());
        }
        Ok(())
    }

    fn single_input(&self, id: VertexId) -> Result<Edge> {
        let edges = self.graph.in_edges(id)?;
        match edges.as_slice() {
            [edge] => Ok(*edge),
            _ => Err(ExecutionError::Logic(format!(
                "{id} has {} inputs instead of one",
                edges.len()
            ))),
        }
    }

    /// Value flowing along `edge`, if already known.
    fn lookup(&self, edge: &Edge, upstream: &DataSnippet) -> Result<Option<DataEntry>> {
        let entry = match self.data.get(&edge.source) {
            Some(entry) => Some(entry),
            None if self.graph.execution_instance_of(edge.source)? != self.execution_instance => {
                upstream.data.get(&edge.source)
            }
            None => None,
        };
        Ok(entry.map(|e| decode::restrict(e, edge.port_restriction.as_ref())))
    }

    /// Evaluates `transformation` if all its inputs are known.
    fn transform(
        &mut self,
        id: VertexId,
        transformation: &Transformation,
        upstream: &DataSnippet,
    ) -> Result<bool> {
        let mut inputs = Vec::new();
        for edge in self.graph.in_edges(id)? {
            match self.lookup(&edge, upstream)? {
                Some(entry) => inputs.push(entry),
                None => return Ok(false),
            }
        }
        let inputs: Vec<&DataEntry> = inputs.iter().collect();
        let value = transformation.apply(&inputs)?;
        self.data.insert(id, value);
        Ok(true)
    }

    fn collect_spikes(&mut self, id: VertexId) -> Result<()> {
        for edge in self.graph.in_edges(id)? {
            match self.data.get(&edge.source) {
                Some(DataEntry::SpikesToChip(batches)) => {
                    for (entry, spikes) in self.spikes.iter_mut().zip(batches) {
                        entry.extend_from_slice(spikes);
                    }
                }
                Some(other) => {
                    return Err(ExecutionError::Logic(format!(
                        "spike input {id} fed with {:?} data",
                        other.connection_type()
                    )));
                }
                None => {
                    return Err(ExecutionError::MissingData {
                        vertex: edge.source,
                        column: self.column,
                    });
                }
            }
        }
        for spikes in &mut self.spikes {
            spikes.sort();
        }
        Ok(())
    }

    /// Builds the programs of all batch entries.
    pub fn generate(&self, context: &ColumnContext<'_>) -> Result<Vec<EntryProgram>> {
        (0..self.batch_size)
            .map(|entry| self.generate_entry(entry, context))
            .collect()
    }

    #[allow(clippy::too_many_lines)]
    fn generate_entry(&self, entry: usize, context: &ColumnContext<'_>) -> Result<EntryProgram> {
        let duration = self.duration(entry);
        let spikes = &self.spikes[entry];
        let schedules = context.ppu.is_some_and(|p| p.schedules(self.column));
        if duration == FpgaTime::ZERO
            && spikes.is_empty()
            && !self.usages.any()
            && context.hooks.is_none()
        {
            return Ok(EntryProgram::default());
        }

        let u = self.usages;
        let before = context.before;
        let after = context.after;
        let mut tickets = EntryTickets::default();
        let mut abs = AbsoluteTimePlaybackProgramBuilder::new();
        let zero = FpgaTime::ZERO;
        let mut setup = false;

        if u.event_recording && !before.event_recording {
            abs.write(zero, Address(map::EVENT_RECORDING), Word(1));
            setup = true;
        }
        if let Some(ppu) = context.ppu.filter(|_| schedules) {
            let runtime = ppu.internal("runtime")?;
            let cycles = u32::try_from(2 * duration.value()).unwrap_or(u32::MAX);
            for hemisphere in Hemisphere::iter_all() {
                abs.write(zero, address::ppu_memory(hemisphere, runtime.offset), Word(cycles));
            }
            setup = true;
        }
        if u.madc && !before.madc {
            abs.write(zero, Address(map::MADC_CONTROL), Word(MADC_ARM_AND_START));
            setup = true;
        }
        for hemisphere in Hemisphere::iter_all() {
            if u.hagen[hemisphere.value()] && self.params.enable_cadc_baseline {
                command(&mut abs, zero, context.ppu, hemisphere, PpuCommand::BaselineRead)?;
                setup = true;
            }
        }
        for hemisphere in Hemisphere::iter_all() {
            let mask = &self.reset_mask[hemisphere.value()];
            if mask.iter().all(|&w| w == 0) {
                continue;
            }
            match context.ppu {
                Some(_) => {
                    command(&mut abs, zero, context.ppu, hemisphere, PpuCommand::ResetNeurons)?;
                }
                None => {
                    for (word, &bits) in mask.iter().enumerate().take(NEURON_RESET_WORDS) {
                        if bits != 0 {
                            abs.write(zero, address::neuron_reset(hemisphere, word), Word(bits));
                        }
                    }
                }
            }
            setup = true;
        }
        if u.uses_periodic() && !before.uses_periodic() {
            for hemisphere in periodic_hemispheres(context.ppu) {
                command(&mut abs, zero, context.ppu, hemisphere, PpuCommand::PeriodicRead)?;
            }
            tickets.periodic_start = Some(abs.read(zero, Address(map::NULL_PAYLOAD), 1));
            setup = true;
        }

        let begin = if setup {
            self.params.wait_before_realtime
        } else {
            zero
        };
        tickets.begin = Some(abs.read(begin, Address(map::NULL_PAYLOAD), 1));
        if schedules {
            for hemisphere in Hemisphere::iter_all() {
                command(&mut abs, begin, context.ppu, hemisphere, PpuCommand::Scheduler)?;
            }
        }
        for spike in spikes {
            abs.spike(begin + spike.time, spike.label);
        }
        if let Some(hooks) = context.hooks {
            let mut inside = AbsoluteTimePlaybackProgramBuilder::new();
            inside.copy(&hooks.inside_realtime);
            inside.shift_time(begin);
            abs.merge(&mut inside);
        }
        let end = begin + duration;
        tickets.end = Some(abs.read(end, Address(map::NULL_PAYLOAD), 1));

        let teardown = end + self.params.wait_after_realtime;
        for hemisphere in Hemisphere::iter_all() {
            if u.hagen[hemisphere.value()] {
                command(&mut abs, teardown, context.ppu, hemisphere, PpuCommand::Read)?;
            }
        }
        if u.uses_periodic() && !after.uses_periodic() {
            for hemisphere in periodic_hemispheres(context.ppu) {
                command(&mut abs, teardown, context.ppu, hemisphere, PpuCommand::StopPeriodicRead)?;
            }
        }
        if u.madc && !after.madc {
            abs.write(teardown, Address(map::MADC_CONTROL), Word(MADC_STOP));
        }
        if u.event_recording && !after.event_recording {
            abs.write(teardown, Address(map::EVENT_RECORDING), Word(0));
        }

        let mut builder = PlaybackProgramBuilder::new();
        builder.timer_reset();
        if let Some(hooks) = context.hooks {
            builder.copy_back(&hooks.inside_realtime_begin);
        }
        builder.merge_back(&mut abs.done());
        if let Some(hooks) = context.hooks {
            builder.copy_back(&hooks.inside_realtime_end);
        }
        if let Some(ppu) = context.ppu {
            self.finish(&mut builder, &mut tickets, ppu, schedules)?;
        }
        Ok(EntryProgram { builder, tickets })
    }

    /// Waits for the PPUs and reads their results.
    fn finish(
        &self,
        builder: &mut PlaybackProgramBuilder,
        tickets: &mut EntryTickets,
        ppu: &PpuProgram,
        schedules: bool,
    ) -> Result<()> {
        let busy: Vec<Hemisphere> = Hemisphere::iter_all()
            .filter(|h| schedules || self.usages.hagen[h.value()])
            .collect();
        if !busy.is_empty() {
            let status = ppu.internal("status")?;
            set_instruction_timeout(builder, self.params.ppu_finish_timeout);
            for &hemisphere in &busy {
                builder.barrier();
                builder.poll_until(
                    address::ppu_memory(hemisphere, status.offset),
                    u32::MAX,
                    PpuCommand::Idle.word(),
                );
            }
            set_instruction_timeout(builder, self.params.default_instruction_timeout);
            tickets.ppu_status = busy
                .iter()
                .map(|&h| builder.read(address::ppu_memory(h, status.offset), 1))
                .collect();
        }
        if schedules {
            let drops = ppu.internal("scheduler_event_drop_count")?;
            let mailbox = ppu.internal("mailbox")?;
            for hemisphere in Hemisphere::iter_all() {
                let at = address::ppu_memory(hemisphere, drops.offset);
                tickets.scheduler_drops.push(builder.read(at, 1));
                builder.write(at, Word(0));
                tickets
                    .mailbox
                    .push(builder.read(address::ppu_memory(hemisphere, mailbox.offset), MAILBOX_WORDS));
            }
            for id in ppu.start_periods(self.column).into_keys() {
                let counter = ppu.internal(&format!("timer_{id}_event_drop_count"))?;
                for hemisphere in Hemisphere::iter_all() {
                    let at = address::ppu_memory(hemisphere, counter.offset);
                    tickets.timer_drops.push((id, builder.read(at, 1)));
                    builder.write(at, Word(0));
                }
            }
        }
        for rule in &self.rules {
            let Some(layout) = ppu.recordings().get(&rule.id()) else {
                continue;
            };
            let (first, last) = layout.column_range(self.column);
            if last == first {
                continue;
            }
            let words = (last - first).div_ceil(4);
            let [top, bottom] = layout
                .buffers
                .map(|buffer| builder.read(address::external_ppu_memory(buffer + first), words));
            tickets.recordings.insert(rule.id(), [top, bottom]);
        }
        if self.usages.hagen.iter().any(|&h| h) {
            let result = ppu.internal("cadc_result")?;
            for hemisphere in Hemisphere::iter_all() {
                if self.usages.hagen[hemisphere.value()] {
                    tickets.cadc[hemisphere.value()] = Some(
                        builder.read(address::ppu_memory(hemisphere, result.offset), result.size),
                    );
                }
            }
        }
        Ok(())
    }

    /// Decodes hardware results and evaluates the remaining host vertices.
    ///
    /// Returns the column's output snippet and the accumulated realtime.
    pub fn post_process(
        &mut self,
        entries: &[EntryProgram],
        recorded: &Recorded<'_>,
        ppu: Option<&PpuProgram>,
    ) -> Result<(DataSnippet, Duration)> {
        let intervals = entries
            .iter()
            .zip(&self.runtime)
            .map(|(entry, &runtime)| entry.interval(runtime))
            .collect::<Result<Vec<_>>>()?;
        for entry in entries {
            self.check_ppu(&entry.tickets)?;
        }

        let graph = self.graph;
        let empty = DataSnippet::default();
        for id in std::mem::take(&mut self.deferred) {
            let value = match graph.vertex_property(id)? {
                Vertex::CrossbarL2Output(_) => DataEntry::SpikesFromChip(
                    intervals
                        .iter()
                        .map(|i| {
                            i.map(|i| {
                                decode::events_in(recorded.spikes, &i)
                                    .map(|(time, s)| TimedSpikeFromChip {
                                        time,
                                        label: s.label,
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                        })
                        .collect(),
                ),
                Vertex::MadcReadoutView(_) => DataEntry::MadcSamples(
                    intervals
                        .iter()
                        .map(|i| {
                            i.map(|i| {
                                decode::events_in(recorded.madc, &i)
                                    .map(|(time, s)| TimedMadcSampleFromChip {
                                        time,
                                        value: s.value,
                                        channel: s.channel,
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                        })
                        .collect(),
                ),
                Vertex::CadcMembraneReadoutView(view) => {
                    DataEntry::Int8(decode_cadc(view, entries, &intervals, recorded.periodic)?)
                }
                Vertex::PlasticityRule(rule) => {
                    DataEntry::Int8(self.decode_recording(rule, entries, &intervals, ppu)?)
                }
                Vertex::Transformation(transformation) => {
                    if !self.transform(id, transformation, &empty)? {
                        return Err(ExecutionError::Logic(format!(
                            "inputs of {id} unavailable after execution"
                        )));
                    }
                    continue;
                }
                Vertex::DataOutput(_) => {
                    let edge = self.single_input(id)?;
                    self.lookup(&edge, &empty)?.ok_or_else(|| {
                        ExecutionError::Logic(format!("source of {id} produced no data"))
                    })?
                }
                other => {
                    return Err(ExecutionError::Logic(format!(
                        "{} deferred to post-processing",
                        other.name()
                    )));
                }
            };
            self.data.insert(id, value);
        }

        let mut snippet = DataSnippet::default();
        for &id in self.graph.vertices_of(self.execution_instance) {
            let exported = matches!(
                self.graph.vertex_property(id)?,
                Vertex::DataOutput(_) | Vertex::Transformation(_)
            );
            if let Some(value) = self.data.get(&id).filter(|_| exported) {
                snippet.data.insert(id, value.clone());
            }
        }
        let mut realtime = Duration::ZERO;
        if intervals.iter().any(Option::is_some) {
            snippet.runtime = intervals
                .iter()
                .map(|i| {
                    let mut runtime = BTreeMap::new();
                    if let Some(i) = i {
                        let length = i.end.saturating_sub(i.begin);
                        realtime += length.as_duration();
                        runtime.insert(self.execution_instance, length);
                    }
                    runtime
                })
                .collect();
        }
        Ok((snippet, realtime))
    }

    /// Telemetry checks; anomalies are logged, never fatal.
    fn check_ppu(&self, tickets: &EntryTickets) -> Result<()> {
        for status in &tickets.ppu_status {
            let word = status.get()?.first().map_or(0, |w| w.0);
            if word != PpuCommand::Idle.word() {
                warn!(
                    ei = %self.execution_instance,
                    column = self.column,
                    status = word,
                    "PPU not idle after realtime interval"
                );
            }
        }
        let mut dropped = 0u64;
        for ticket in &tickets.scheduler_drops {
            dropped += ticket.get()?.iter().map(|w| u64::from(w.0)).sum::<u64>();
        }
        if dropped > 0 {
            warn!(
                ei = %self.execution_instance,
                column = self.column,
                dropped,
                "PPU scheduler dropped rule invocations"
            );
        }
        for (rule, ticket) in &tickets.timer_drops {
            let dropped: u32 = ticket.get()?.iter().map(|w| w.0).sum();
            if dropped > 0 {
                warn!(ei = %self.execution_instance, rule, dropped, "plasticity rule missed its timer");
            }
        }
        for ticket in &tickets.mailbox {
            let bytes = ticket.bytes()?;
            let text = String::from_utf8_lossy(&bytes);
            let text = text.trim_end_matches('\0');
            if !text.is_empty() {
                debug!(ei = %self.execution_instance, mailbox = text, "PPU mailbox");
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn decode_recording(
        &self,
        rule: &PlasticityRule,
        entries: &[EntryProgram],
        intervals: &[Option<Interval>],
        ppu: Option<&PpuProgram>,
    ) -> Result<Vec<TimedDataSequence<Vec<i8>>>> {
        let layout = ppu.and_then(|p| p.recordings().get(&rule.id()));
        let (first, last) = rule.recorded_memory_data_interval();
        let join = |top: &[u8], bottom: &[u8]| -> Vec<i8> {
            top[first..last]
                .iter()
                .chain(&bottom[first..last])
                .map(|&b| b as i8)
                .collect()
        };
        entries
            .iter()
            .zip(intervals)
            .map(|(entry, interval)| {
                let (Some(interval), Some([top, bottom]), Some(layout)) =
                    (interval, entry.tickets.recordings.get(&rule.id()), layout)
                else {
                    return Ok(Vec::new());
                };
                let (top, bottom) = (top.bytes()?, bottom.bytes()?);
                let size = layout.size;
                Ok(match layout.kind {
                    RecordingKind::Raw => vec![TimedData::new(
                        interval.end.saturating_sub(interval.begin),
                        join(&top[..size], &bottom[..size]),
                    )],
                    RecordingKind::Timed => top
                        .chunks_exact(size)
                        .zip(bottom.chunks_exact(size))
                        .filter_map(|(top, bottom)| {
                            let time = decode::record_time(top)?.checked_sub(interval.begin)?;
                            Some(TimedData::new(time, join(top, bottom)))
                        })
                        .collect(),
                    RecordingKind::None => Vec::new(),
                })
            })
            .collect()
    }
}

/// Hemispheres with a periodic sample buffer; sampling starts and stops on
/// all of them together.
fn periodic_hemispheres(ppu: Option<&PpuProgram>) -> Vec<Hemisphere> {
    ppu.and_then(PpuProgram::periodic)
        .map(|layout| {
            Hemisphere::iter_all()
                .filter(|h| layout.buffers[h.value()].is_some())
                .collect()
        })
        .unwrap_or_default()
}

fn command(
    abs: &mut AbsoluteTimePlaybackProgramBuilder,
    time: FpgaTime,
    ppu: Option<&PpuProgram>,
    hemisphere: Hemisphere,
    command: PpuCommand,
) -> Result<()> {
    let ppu = ppu.ok_or_else(|| {
        ExecutionError::Logic(format!("{command:?} requested without a PPU program"))
    })?;
    let status = ppu.internal("status")?;
    abs.write(
        time,
        address::ppu_memory(hemisphere, status.offset),
        Word(command.word()),
    );
    Ok(())
}

fn decode_cadc(
    view: &CadcMembraneReadoutView,
    entries: &[EntryProgram],
    intervals: &[Option<Interval>],
    periodic: &[[Vec<PeriodicSample>; 2]],
) -> Result<Vec<TimedDataSequence<Vec<i8>>>> {
    let h = view.synram().value();
    let pick = |values: &[i8]| -> Vec<i8> { view.flat_columns().map(|c| values[c.value()]).collect() };
    entries
        .iter()
        .zip(intervals)
        .enumerate()
        .map(|(b, (entry, interval))| {
            let Some(interval) = interval else {
                return Ok(Vec::new());
            };
            Ok(match view.mode() {
                CadcMode::Hagen => match &entry.tickets.cadc[h] {
                    Some(ticket) => vec![TimedData::new(
                        interval.end.saturating_sub(interval.begin),
                        pick(&from_vector_unit_row(&ticket.bytes()?)),
                    )],
                    None => Vec::new(),
                },
                CadcMode::Periodic | CadcMode::PeriodicOnDram => periodic
                    .get(b)
                    .map(|samples| {
                        samples[h]
                            .iter()
                            .filter_map(|s| {
                                interval
                                    .relative(s.time)
                                    .map(|t| TimedData::new(t, pick(&s.values)))
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow_core::vertex::transformation::TransformationFunction;
    use sigflow_core::vertex::{
        CrossbarL2Input, CrossbarL2Output, CrossbarNode, DataInput, DataOutput, ExternalInput,
        MadcReadoutView, MadcSource, NeuronView, NeuronViewConfig, SourceSelection,
    };
    use sigflow_core::{ConnectionType, Input, PortRestriction};
    use sigflow_hw::SpikeLabel;
    use sigflow_hw::builder::Instruction;
    use sigflow_hw::chip::{CrossbarNodeConfig, ReadoutSource};
    use sigflow_hw::coord::{
        AtomicNeuron, CrossbarInput, CrossbarNodeOnDls, CrossbarOutput, L2Channel, NeuronColumn,
    };

    fn ei(step: u32) -> ExecutionInstanceId {
        ExecutionInstanceId::step(step)
    }

    fn int8(values: Vec<i8>) -> DataEntry {
        DataEntry::Int8(vec![vec![TimedData::new(FpgaTime::ZERO, values)]])
    }

    /// `ei(0)` forwards an external vector, `ei(1)` applies a ReLU to it.
    fn host_chain(graph: &mut Graph) -> (VertexId, VertexId, VertexId) {
        let ext = graph
            .add(ExternalInput::new(ConnectionType::DataInt8, 4).unwrap(), ei(0), [])
            .unwrap();
        let input = graph
            .add(DataInput::new(ConnectionType::Int8, 4).unwrap(), ei(0), [Input::from(ext)])
            .unwrap();
        let output = graph
            .add(DataOutput::new(ConnectionType::Int8, 4).unwrap(), ei(0), [Input::from(input)])
            .unwrap();
        let relu = Transformation::new(TransformationFunction::ConvertingRelu { size: 4, shift: 2 })
            .unwrap();
        let relu = graph.add(relu, ei(1), [Input::from(output)]).unwrap();
        (ext, output, relu)
    }

    fn spike_loop(graph: &mut Graph) -> VertexId {
        let ext = graph
            .add(
                ExternalInput::new(ConnectionType::DataTimedSpikeToChipSequence, 1).unwrap(),
                ei(0),
                [],
            )
            .unwrap();
        let input = graph
            .add(
                DataInput::new(ConnectionType::TimedSpikeToChipSequence, 1).unwrap(),
                ei(0),
                [Input::from(ext)],
            )
            .unwrap();
        let l2_input = graph.add(CrossbarL2Input, ei(0), [Input::from(input)]).unwrap();
        let node = graph
            .add(
                CrossbarNode::new(
                    CrossbarNodeOnDls::new(
                        CrossbarInput::from_l2(L2Channel::new(0)),
                        CrossbarOutput::from_l2(L2Channel::new(0)),
                    ),
                    CrossbarNodeConfig::PASS_ALL,
                ),
                ei(0),
                [Input::from(l2_input)],
            )
            .unwrap();
        let l2_output = graph.add(CrossbarL2Output, ei(0), [Input::from(node)]).unwrap();
        graph
            .add(
                DataOutput::new(ConnectionType::TimedSpikeFromChipSequence, 1).unwrap(),
                ei(0),
                [Input::from(l2_output)],
            )
            .unwrap();
        ext
    }

    #[test]
    fn host_values_flow_across_execution_instances() {
        let mut graph = Graph::default();
        let (ext, output, relu) = host_chain(&mut graph);
        let params = HardwareParameters::default();

        let mut input = DataSnippet::default();
        input.data.insert(ext, int8(vec![-8, 4, 12, 127]));
        let mut first = RealtimeSnippet::new(&graph, ei(0), 0, &params, 1);
        let usages = first
            .pre_process(&input, &DataSnippet::default(), &mut PpuUsage::new(1))
            .unwrap();
        assert!(!usages.any());

        let entries = first.generate(&ColumnContext::default()).unwrap();
        assert!(entries[0].builder.is_empty());
        let recorded = Recorded {
            spikes: &[],
            madc: &[],
            periodic: &[],
        };
        let (upstream, realtime) = first.post_process(&entries, &recorded, None).unwrap();
        assert_eq!(realtime, Duration::ZERO);
        assert_eq!(upstream.data[&output], int8(vec![-8, 4, 12, 127]));

        let mut second = RealtimeSnippet::new(&graph, ei(1), 0, &params, 1);
        second
            .pre_process(&DataSnippet::default(), &upstream, &mut PpuUsage::new(1))
            .unwrap();
        let (snippet, _) = second.post_process(&[EntryProgram::default()], &recorded, None).unwrap();
        let DataEntry::UInt5(relu) = &snippet.data[&relu] else {
            panic!("ReLU produces UInt5 data");
        };
        assert_eq!(relu[0][0].data, vec![0, 1, 3, 31]);
    }

    #[test]
    fn missing_external_data_is_reported() {
        let mut graph = Graph::default();
        let (ext, _, _) = host_chain(&mut graph);
        let params = HardwareParameters::default();
        let mut snippet = RealtimeSnippet::new(&graph, ei(0), 3, &params, 1);
        let err = snippet
            .pre_process(&DataSnippet::default(), &DataSnippet::default(), &mut PpuUsage::new(4))
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::MissingData { vertex, column: 3 } if vertex == ext
        ));
    }

    #[test]
    fn late_spikes_extend_the_realtime_interval() {
        let mut graph = Graph::default();
        let ext = spike_loop(&mut graph);
        let params = HardwareParameters::default();

        let spike = |time| TimedSpikeToChip {
            time: FpgaTime(time),
            label: SpikeLabel(3),
        };
        let mut input = DataSnippet::default();
        input.data.insert(
            ext,
            DataEntry::SpikesToChip(vec![vec![spike(500), spike(20)], vec![]]),
        );
        input.runtime = vec![
            BTreeMap::from([(ei(0), FpgaTime(300))]),
            BTreeMap::from([(ei(0), FpgaTime(1000))]),
        ];

        let mut snippet = RealtimeSnippet::new(&graph, ei(0), 0, &params, 2);
        let usages = snippet
            .pre_process(&input, &DataSnippet::default(), &mut PpuUsage::new(1))
            .unwrap();
        assert!(usages.event_recording);
        assert_eq!(snippet.duration(0), FpgaTime(500));
        assert_eq!(snippet.duration(1), FpgaTime(1000));
        assert_eq!(snippet.max_duration(), FpgaTime(1000));

        let entries = snippet.generate(&ColumnContext::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.builder.is_empty()));
        assert!(entries[0].periodic_start().is_none());
    }

    #[test]
    fn usages_are_shared_with_neighbouring_columns() {
        let recording = Usages {
            event_recording: true,
            ..Usages::default()
        };
        assert!(recording.any());
        assert!(!recording.uses_periodic());
        let periodic = Usages {
            periodic: [false, true],
            ..Usages::default()
        };
        assert!(periodic.uses_periodic());
        assert!(!Usages::default().any());
    }

    /// Column 0 read by the CADC in hagen mode, column 1 recorded by the MADC.
    fn readouts(graph: &mut Graph) {
        let neurons = NeuronView::new(
            vec![NeuronColumn::new(0), NeuronColumn::new(1)],
            vec![NeuronViewConfig::default(); 2],
            Hemisphere::Top,
        )
        .unwrap();
        let neurons = graph.add(neurons, ei(0), []).unwrap();
        let cadc = CadcMembraneReadoutView::new(
            vec![vec![NeuronColumn::new(0)]],
            Hemisphere::Top,
            CadcMode::Hagen,
            vec![vec![ReadoutSource::Membrane]],
        )
        .unwrap();
        let cadc = graph
            .add(cadc, ei(0), [Input::restricted(neurons, PortRestriction::new(0, 0))])
            .unwrap();
        graph
            .add(DataOutput::new(ConnectionType::Int8, 1).unwrap(), ei(0), [Input::from(cadc)])
            .unwrap();
        let madc = MadcReadoutView::new(
            MadcSource {
                neuron: AtomicNeuron::new(Hemisphere::Top, NeuronColumn::new(1)),
                source: ReadoutSource::Membrane,
            },
            None,
            SourceSelection::default(),
        )
        .unwrap();
        let madc = graph
            .add(madc, ei(0), [Input::restricted(neurons, PortRestriction::new(1, 1))])
            .unwrap();
        graph
            .add(
                DataOutput::new(ConnectionType::TimedMADCSampleFromChipSequence, 1).unwrap(),
                ei(0),
                [Input::from(madc)],
            )
            .unwrap();
    }

    /// Usages of the readout column and the number of baseline commands it issues.
    fn baseline_commands(params: &HardwareParameters) -> (Usages, usize) {
        let mut graph = Graph::default();
        readouts(&mut graph);
        let input = DataSnippet {
            data: BTreeMap::new(),
            runtime: vec![BTreeMap::from([(ei(0), FpgaTime(1000))])],
        };
        let mut usage = PpuUsage::new(1);
        let mut snippet = RealtimeSnippet::new(&graph, ei(0), 0, params, 1);
        let usages = snippet
            .pre_process(&input, &DataSnippet::default(), &mut usage)
            .unwrap();
        let ppu = PpuProgram::compile(&usage, params).unwrap();
        let context = ColumnContext {
            ppu: Some(&ppu),
            ..ColumnContext::default()
        };
        let entries = snippet.generate(&context).unwrap();

        let status = ppu.internal("status").unwrap().offset;
        let baseline = Word(PpuCommand::BaselineRead.word());
        let count = entries[0]
            .builder
            .instructions()
            .iter()
            .filter(|instruction| {
                matches!(instruction, Instruction::Write { address: a, word }
                    if *word == baseline
                        && Hemisphere::iter_all().any(|h| *a == address::ppu_memory(h, status)))
            })
            .count();
        (usages, count)
    }

    #[test]
    fn cadc_baseline_read_follows_the_hardware_parameters() {
        let (usages, with_baseline) = baseline_commands(&HardwareParameters::default());
        assert!(usages.hagen[Hemisphere::Top.value()]);
        assert_eq!(with_baseline, 1);

        let params = HardwareParameters {
            enable_cadc_baseline: false,
            ..HardwareParameters::default()
        };
        let (_, without_baseline) = baseline_commands(&params);
        assert_eq!(without_baseline, 0);
    }

    #[test]
    fn madc_recording_enables_event_recording() {
        let (usages, _) = baseline_commands(&HardwareParameters::default());
        assert!(usages.madc);
        assert!(usages.event_recording);
    }
}
