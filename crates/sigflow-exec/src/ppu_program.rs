//! PPU program generation for one execution instance.
//!
//! A single program serves every realtime column of an execution instance.
//! Only the rule table differs between columns: rules absent from a column
//! stay in the table with zero periods, so drop counters and recording
//! buffers keep their place.
//!
//! ```text
//!  internal memory (per hemisphere)          external memory
//!  ┌────────────────────────┐ 0              ┌──────────────────────────┐ 0
//!  │ header, rule table     │                │ rule recordings          │
//!  ├────────────────────────┤                │   top, bottom per rule   │
//!  │ status stopped ppu     │                ├──────────────────────────┤
//!  │ runtime drop count     │                │ periodic CADC buffers    │
//!  │ readout offset mailbox │                │   (unless on DRAM)       │
//!  │ neuron_reset_mask      │                └──────────────────────────┘
//!  │ timer drop counters    │
//!  ├────────────────────────┤ vector aligned
//!  │ cadc_result            │
//!  └────────────────────────┘
//! ```

use std::collections::BTreeMap;

use tracing::{debug, warn};

use sigflow_core::vertex::plasticity_rule::Recording;
use sigflow_core::vertex::{CadcMode, PlasticityRule};
use sigflow_core::{PpuSymbolValue, Vertex};
use sigflow_hw::address::{self, NEURON_RESET_WORDS};
use sigflow_hw::chip::{EXTERNAL_DRAM_BYTES, EXTERNAL_PPU_MEMORY_BYTES};
use sigflow_hw::ppu::{
    self, ExternalPpuMemoryBlock, PpuImageHeader, PpuMemoryBlock, PpuRuleEntry, PpuSymbols,
    RecordingKind, SymbolLocation, VECTOR_ALIGNMENT, VECTOR_ROW_BYTES, image, periodic,
};
use sigflow_hw::{Chip, FpgaTime, HardwareParameters, Hemisphere, PlaybackProgramBuilder, Ticket};

use crate::error::{ExecutionError, Result};

/// Words of the host-readable log buffer.
pub const MAILBOX_WORDS: usize = 16;

/// Words of the CADC result buffer, one vector-unit row.
pub const CADC_RESULT_WORDS: usize = VECTOR_ROW_BYTES / 4;

/// Neuron reset selection of one column, one bit per neuron column.
pub type NeuronResetMask = [[u32; NEURON_RESET_WORDS]; 2];

/// Periods a rule runs in each realtime column.
#[derive(Clone, Debug)]
pub struct RuleUsage {
    /// The rule as found in the first column using it.
    pub rule: PlasticityRule,
    /// Number of periods per column; zero where the rule is absent.
    pub periods: Vec<u32>,
}

/// PPU features used by the columns of one execution instance.
#[derive(Clone, Debug, Default)]
pub struct PpuUsage {
    columns: usize,
    rules: BTreeMap<u32, RuleUsage>,
    hagen: [bool; 2],
    periodic: Option<CadcMode>,
    periodic_hemispheres: [bool; 2],
    periodic_duration: FpgaTime,
}

impl PpuUsage {
    /// Usage of an execution instance spanning `columns` realtime columns.
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Records what `vertex` of realtime column `column` needs.
    pub fn add_vertex(&mut self, column: usize, vertex: &Vertex) -> Result<()> {
        match vertex {
            Vertex::PlasticityRule(rule) => {
                let columns = self.columns;
                let usage = self.rules.entry(rule.id()).or_insert_with(|| RuleUsage {
                    rule: rule.clone(),
                    periods: vec![0; columns],
                });
                if usage.rule.timer().period != rule.timer().period
                    || usage.rule.recording() != rule.recording()
                {
                    return Err(ExecutionError::validation(format!(
                        "plasticity rule {} differs between realtime columns",
                        rule.id()
                    )));
                }
                usage.periods[column] = rule.timer().num_periods;
            }
            Vertex::CadcMembraneReadoutView(view) => {
                let h = view.synram().value();
                match view.mode() {
                    CadcMode::Hagen => self.hagen[h] = true,
                    mode => {
                        if self.periodic.is_some_and(|m| m != mode) {
                            return Err(ExecutionError::validation(
                                "periodic CADC readout on both external memory and DRAM",
                            ));
                        }
                        self.periodic = Some(mode);
                        self.periodic_hemispheres[h] = true;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Extends the span the periodic readout has to cover.
    pub fn add_periodic_duration(&mut self, duration: FpgaTime) {
        self.periodic_duration = self.periodic_duration.max(duration);
    }

    /// Whether no PPU program is needed.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && !self.hagen.iter().any(|&h| h) && self.periodic.is_none()
    }

    /// Used plasticity rules by id.
    pub fn rules(&self) -> &BTreeMap<u32, RuleUsage> {
        &self.rules
    }

    /// Periodic readout mode, if any column uses one.
    pub fn periodic(&self) -> Option<CadcMode> {
        self.periodic
    }
}

/// Place of one rule's recording in external memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingLayout {
    /// Raw or timed.
    pub kind: RecordingKind,
    /// Bytes per record and hemisphere.
    pub size: usize,
    /// Byte offsets of the top and bottom buffers.
    pub buffers: [usize; 2],
    /// First period index per column.
    pub first_period: Vec<u32>,
    /// Periods per column.
    pub periods: Vec<u32>,
}

impl RecordingLayout {
    /// Bytes of one hemisphere's buffer.
    pub fn buffer_bytes(&self) -> usize {
        match self.kind {
            RecordingKind::Timed => self.periods.iter().sum::<u32>() as usize * self.size,
            _ => self.size,
        }
    }

    /// Byte range of column `column`'s records relative to a buffer start.
    pub fn column_range(&self, column: usize) -> (usize, usize) {
        match self.kind {
            RecordingKind::Timed => {
                let first = self.first_period[column] as usize * self.size;
                (first, first + self.periods[column] as usize * self.size)
            }
            RecordingKind::Raw => (0, self.size),
            RecordingKind::None => (0, 0),
        }
    }
}

/// Place and capacity of the periodic CADC sample buffers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodicLayout {
    /// Buffers live in FPGA-side DRAM.
    pub on_dram: bool,
    /// Samples per buffer.
    pub capacity: usize,
    /// Byte offset of the buffer per hemisphere, for sampled hemispheres.
    pub buffers: [Option<usize>; 2],
}

/// Compiled PPU program: symbol table, image headers and memory layout.
#[derive(Clone, Debug)]
pub struct PpuProgram {
    symbols: PpuSymbols,
    header: PpuImageHeader,
    column_rules: Vec<Vec<PpuRuleEntry>>,
    recordings: BTreeMap<u32, RecordingLayout>,
    periodic: Option<PeriodicLayout>,
}

struct Allocator {
    next: usize,
    limit: usize,
}

impl Allocator {
    fn take(&mut self, size: usize, alignment: usize) -> Option<usize> {
        let offset = self.next.div_ceil(alignment.max(1)) * alignment.max(1);
        (offset + size <= self.limit).then(|| {
            self.next = offset + size;
            offset
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn word(value: usize) -> u32 {
    value as u32
}

impl PpuProgram {
    /// Lays out symbols and buffers for `usage`.
    pub fn compile(usage: &PpuUsage, params: &HardwareParameters) -> Result<Self> {
        let mut symbols = PpuSymbols::new();
        let num_rules = usage.rules.len();
        let mut internal = Allocator {
            next: image::HEADER_WORDS + num_rules * image::RULE_WORDS,
            limit: sigflow_hw::chip::PPU_MEMORY_WORDS,
        };
        let mut place = |name: String, size: usize, alignment: usize| -> Result<usize> {
            let offset = internal.take(size, alignment).ok_or_else(|| {
                ExecutionError::validation(format!("PPU memory exhausted placing {name}"))
            })?;
            symbols.insert(name, SymbolLocation::Internal(PpuMemoryBlock::new(offset, size)?));
            Ok(offset)
        };

        let status = place("status".into(), 1, 1)?;
        let stopped = place("stopped".into(), 1, 1)?;
        let ppu = place("ppu".into(), 1, 1)?;
        let runtime = place("runtime".into(), 1, 1)?;
        let scheduler_drops = place("scheduler_event_drop_count".into(), 1, 1)?;
        let readout_offset = place("periodic_cadc_readout_memory_offset".into(), 1, 1)?;
        let mailbox = place("mailbox".into(), MAILBOX_WORDS, 1)?;
        let reset_mask = place("neuron_reset_mask".into(), NEURON_RESET_WORDS, 1)?;
        let mut timer_drops = None;
        for id in usage.rules.keys() {
            let offset = place(format!("timer_{id}_event_drop_count"), 1, 1)?;
            timer_drops.get_or_insert(offset);
        }
        let cadc_result = place("cadc_result".into(), CADC_RESULT_WORDS, VECTOR_ALIGNMENT / 4)?;

        let mut external = Allocator {
            next: 0,
            limit: EXTERNAL_PPU_MEMORY_BYTES,
        };
        let mut recordings = BTreeMap::new();
        for (&id, rule) in &usage.rules {
            let Some(layout) = recording_layout(rule, &mut external)? else {
                continue;
            };
            for (hemisphere, &offset) in Hemisphere::iter_all().zip(&layout.buffers) {
                let name = match hemisphere {
                    Hemisphere::Top => format!("recorded_scratchpad_memory_top_{id}"),
                    Hemisphere::Bottom => format!("recorded_scratchpad_memory_bottom_{id}"),
                };
                symbols.insert(
                    name,
                    SymbolLocation::External(ExternalPpuMemoryBlock::new(offset, layout.buffer_bytes())?),
                );
            }
            recordings.insert(id, layout);
        }

        let periodic = usage
            .periodic
            .map(|mode| periodic_layout(usage, mode, params, &mut external, &mut symbols))
            .transpose()?;

        let mut flags = 0;
        if let Some(layout) = &periodic {
            flags |= image::flag::PERIODIC_CADC;
            if layout.on_dram {
                flags |= image::flag::PERIODIC_CADC_ON_DRAM;
            }
        }
        let column_rules = (0..usage.columns)
            .map(|column| rule_table(usage, &recordings, column))
            .collect::<Vec<_>>();
        let header = PpuImageHeader {
            flags,
            num_periodic_cadc_samples: periodic.as_ref().map_or(0, |p| word(p.capacity)),
            status: word(status),
            cadc_result: word(cadc_result),
            runtime: word(runtime),
            neuron_reset_mask: word(reset_mask),
            mailbox: word(mailbox),
            scheduler_event_drop_count: word(scheduler_drops),
            stopped: word(stopped),
            ppu: word(ppu),
            periodic_cadc_samples: periodic
                .as_ref()
                .map_or([0, 0], |p| p.buffers.map(|b| word(b.unwrap_or(0)))),
            timer_event_drop_count: word(timer_drops.unwrap_or(0)),
            periodic_cadc_readout_memory_offset: word(readout_offset),
            periodic_cadc_fpga_wait_clock_cycles: params.periodic_cadc_fpga_wait_clock_cycles,
            rules: column_rules.first().cloned().unwrap_or_default(),
        };
        debug!(
            rules = num_rules,
            symbols = symbols.len(),
            periodic = periodic.is_some(),
            "compiled PPU program"
        );
        Ok(Self {
            symbols,
            header,
            column_rules,
            recordings,
            periodic,
        })
    }

    /// Symbol table.
    pub fn symbols(&self) -> &PpuSymbols {
        &self.symbols
    }

    /// Internal memory block of `name`.
    pub fn internal(&self, name: &str) -> Result<PpuMemoryBlock> {
        ppu::internal_block(&self.symbols, name)
            .map_err(|_| ExecutionError::UnknownSymbol(name.to_owned()))
    }

    /// Whether column `column` schedules at least one rule invocation.
    pub fn schedules(&self, column: usize) -> bool {
        self.column_rules
            .get(column)
            .is_some_and(|rules| rules.iter().any(|r| r.num_periods > 0))
    }

    /// Recording layouts by rule id.
    pub fn recordings(&self) -> &BTreeMap<u32, RecordingLayout> {
        &self.recordings
    }

    /// Periodic readout buffers, if compiled in.
    pub fn periodic(&self) -> Option<&PeriodicLayout> {
        self.periodic.as_ref()
    }

    /// Period index each rule starts at in column `column`.
    pub fn start_periods(&self, column: usize) -> BTreeMap<u32, u32> {
        self.column_rules
            .get(column)
            .map(|rules| rules.iter().map(|r| (r.id, r.first_period)).collect())
            .unwrap_or_default()
    }

    /// Writes image and column-specific state into `chip`.
    pub fn apply(&self, chip: &mut Chip, column: usize, reset_mask: &NeuronResetMask) {
        let mut header = self.header.clone();
        if let Some(rules) = self.column_rules.get(column) {
            header.rules.clone_from(rules);
        }
        let words = header.encode();
        for hemisphere in Hemisphere::iter_all() {
            let h = hemisphere.value();
            let memory = &mut chip.ppu_memory[h];
            memory[..words.len()].copy_from_slice(&words);
            memory[header.ppu as usize] = word(h);
            let mask = header.neuron_reset_mask as usize;
            memory[mask..mask + NEURON_RESET_WORDS].copy_from_slice(&reset_mask[h]);
        }
    }

    /// Writes caller-supplied symbol values into `chip` or the DRAM image.
    pub fn write_symbols(
        &self,
        values: &BTreeMap<String, PpuSymbolValue>,
        chip: &mut Chip,
        dram: &mut Option<Vec<u8>>,
    ) -> Result<()> {
        for (name, value) in values {
            let location = self
                .symbols
                .get(name)
                .ok_or_else(|| ExecutionError::UnknownSymbol(name.clone()))?;
            match (location, value) {
                (SymbolLocation::Internal(block), PpuSymbolValue::Internal(words)) => {
                    for (memory, words) in chip.ppu_memory.iter_mut().zip(words) {
                        let n = words.len().min(block.size);
                        memory[block.offset..block.offset + n].copy_from_slice(&words[..n]);
                    }
                }
                (SymbolLocation::External(block), PpuSymbolValue::External(bytes)) => {
                    let n = bytes.len().min(block.size);
                    chip.external_ppu_memory[block.offset..block.offset + n]
                        .copy_from_slice(&bytes[..n]);
                }
                (SymbolLocation::ExternalDram(block), PpuSymbolValue::ExternalDram(bytes)) => {
                    let n = bytes.len().min(block.size);
                    let image = dram.get_or_insert_with(Vec::new);
                    if image.len() < block.offset + n {
                        image.resize(block.offset + n, 0);
                    }
                    image[block.offset..block.offset + n].copy_from_slice(&bytes[..n]);
                }
                _ => {
                    return Err(ExecutionError::validation(format!(
                        "value for PPU symbol {name} does not match its memory"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Pending read of one PPU symbol.
#[derive(Clone, Debug)]
pub enum SymbolRead {
    /// Words of both hemispheres.
    Internal([Ticket; 2]),
    /// Word-aligned read of external memory; bytes `skip..skip + size`.
    External {
        /// Read words.
        ticket: Ticket,
        /// Leading bytes to drop.
        skip: usize,
        /// Symbol size in bytes.
        size: usize,
        /// Whether the symbol lives in DRAM.
        dram: bool,
    },
}

impl SymbolRead {
    /// Decoded value after execution.
    pub fn value(&self) -> Result<PpuSymbolValue> {
        Ok(match self {
            SymbolRead::Internal([top, bottom]) => PpuSymbolValue::Internal([
                top.get()?.iter().map(|w| w.0).collect(),
                bottom.get()?.iter().map(|w| w.0).collect(),
            ]),
            SymbolRead::External {
                ticket,
                skip,
                size,
                dram,
            } => {
                let bytes = ticket.bytes()?;
                let bytes = bytes.get(*skip..skip + size).unwrap_or_default().to_vec();
                if *dram {
                    PpuSymbolValue::ExternalDram(bytes)
                } else {
                    PpuSymbolValue::External(bytes)
                }
            }
        })
    }
}

impl PpuProgram {
    /// Appends reads of `names` to `builder`.
    pub fn read_symbols<'n>(
        &self,
        names: impl IntoIterator<Item = &'n String>,
        builder: &mut PlaybackProgramBuilder,
    ) -> Result<BTreeMap<String, SymbolRead>> {
        let mut reads = BTreeMap::new();
        for name in names {
            let location = self
                .symbols
                .get(name)
                .ok_or_else(|| ExecutionError::UnknownSymbol(name.clone()))?;
            let read = match location {
                SymbolLocation::Internal(block) => SymbolRead::Internal(
                    Hemisphere::ALL
                        .map(|h| builder.read(address::ppu_memory(h, block.offset), block.size)),
                ),
                SymbolLocation::External(block) | SymbolLocation::ExternalDram(block) => {
                    let dram = matches!(location, SymbolLocation::ExternalDram(_));
                    let skip = block.offset % 4;
                    let first = if dram {
                        address::external_dram(block.offset)
                    } else {
                        address::external_ppu_memory(block.offset)
                    };
                    SymbolRead::External {
                        ticket: builder.read(first, (skip + block.size).div_ceil(4)),
                        skip,
                        size: block.size,
                        dram,
                    }
                }
            };
            reads.insert(name.clone(), read);
        }
        Ok(reads)
    }
}

fn recording_layout(rule: &RuleUsage, external: &mut Allocator) -> Result<Option<RecordingLayout>> {
    let size = rule.rule.recorded_scratchpad_memory_size();
    let kind = match rule.rule.recording() {
        None => return Ok(None),
        Some(Recording::Raw { .. }) => RecordingKind::Raw,
        Some(Recording::Timed { .. }) => RecordingKind::Timed,
    };
    let mut first_period = Vec::with_capacity(rule.periods.len());
    let mut total = 0u32;
    for &periods in &rule.periods {
        first_period.push(total);
        total += periods;
    }
    let bytes = if kind == RecordingKind::Timed {
        total as usize * size
    } else {
        size
    };
    let alignment = rule.rule.recorded_scratchpad_memory_alignment().max(VECTOR_ALIGNMENT);
    let mut buffers = [0; 2];
    for buffer in &mut buffers {
        *buffer = external.take(bytes, alignment).ok_or_else(|| {
            ExecutionError::validation(format!(
                "recording of plasticity rule {} does not fit into PPU external memory",
                rule.rule.id()
            ))
        })?;
    }
    Ok(Some(RecordingLayout {
        kind,
        size,
        buffers,
        first_period,
        periods: rule.periods.clone(),
    }))
}

fn periodic_layout(
    usage: &PpuUsage,
    mode: CadcMode,
    params: &HardwareParameters,
    external: &mut Allocator,
    symbols: &mut PpuSymbols,
) -> Result<PeriodicLayout> {
    let on_dram = mode == CadcMode::PeriodicOnDram;
    let used = usage.periodic_hemispheres.iter().filter(|&&h| h).count().max(1);
    let estimate = params.estimate_periodic_cadc_samples(usage.periodic_duration);
    let (mut allocator, hard_cap) = if on_dram {
        let fits = (EXTERNAL_DRAM_BYTES / used).saturating_sub(periodic::HEADER_BYTES)
            / periodic::SAMPLE_BYTES;
        (
            Allocator {
                next: 0,
                limit: EXTERNAL_DRAM_BYTES,
            },
            fits,
        )
    } else {
        let start = external.next.div_ceil(VECTOR_ALIGNMENT) * VECTOR_ALIGNMENT;
        let free = EXTERNAL_PPU_MEMORY_BYTES.saturating_sub(start);
        let fits = (free / used).saturating_sub(periodic::HEADER_BYTES) / periodic::SAMPLE_BYTES;
        (
            Allocator {
                next: start,
                limit: EXTERNAL_PPU_MEMORY_BYTES,
            },
            fits.min(params.num_cadc_samples_in_extmem),
        )
    };
    let capacity = estimate.min(hard_cap);
    if capacity == 0 {
        return Err(ExecutionError::validation(
            "no memory left for periodic CADC samples",
        ));
    }
    if estimate > capacity {
        warn!(
            estimate,
            capacity, "periodic CADC readout will drop samples beyond buffer capacity"
        );
    }

    let mut buffers = [None, None];
    for hemisphere in Hemisphere::iter_all() {
        if !usage.periodic_hemispheres[hemisphere.value()] {
            continue;
        }
        let size = periodic::buffer_bytes(capacity);
        let offset = allocator.take(size, VECTOR_ALIGNMENT).ok_or_else(|| {
            ExecutionError::validation("periodic CADC buffers exceed their memory")
        })?;
        let name = match hemisphere {
            Hemisphere::Top => "periodic_cadc_samples_top",
            Hemisphere::Bottom => "periodic_cadc_samples_bottom",
        };
        let location = if on_dram {
            SymbolLocation::ExternalDram(ExternalPpuMemoryBlock::in_dram(offset, size))
        } else {
            SymbolLocation::External(ExternalPpuMemoryBlock::new(offset, size)?)
        };
        symbols.insert(name.to_owned(), location);
        buffers[hemisphere.value()] = Some(offset);
    }
    if !on_dram {
        external.next = allocator.next;
    }
    Ok(PeriodicLayout {
        on_dram,
        capacity,
        buffers,
    })
}

fn rule_table(
    usage: &PpuUsage,
    recordings: &BTreeMap<u32, RecordingLayout>,
    column: usize,
) -> Vec<PpuRuleEntry> {
    usage
        .rules
        .iter()
        .map(|(&id, rule)| {
            let timer = rule.rule.timer();
            let layout = recordings.get(&id);
            PpuRuleEntry {
                id,
                timer_start: timer.start,
                period: timer.period,
                num_periods: rule.periods[column],
                recording: layout.map_or(RecordingKind::None, |l| l.kind),
                recording_size: layout.map_or(0, |l| word(l.size)),
                recording_top: layout.map_or(0, |l| word(l.buffers[0])),
                recording_bottom: layout.map_or(0, |l| word(l.buffers[1])),
                first_period: layout.map_or(0, |l| l.first_period[column]),
                first_column: 0,
            }
        })
        .collect()
}
