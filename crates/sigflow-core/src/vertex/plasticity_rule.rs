//! PPU plasticity rule.
//!
//! A rule is a kernel executed periodically by both PPUs on the synapse and
//! neuron views connected to it. It may record data into scratchpad memory,
//! either as one raw block per batch entry or as one timed record per period.
//!
//! # Timed record layout
//!
//! ```text
//!  0        8                                   size
//!  ├────────┼──────┬──────────┬─────────┬─ ─ ─ ─┤
//!  │ time   │ pad  │ obs. "a" │ obs. "b"│ pad   │
//!  └────────┴──────┴──────────┴─────────┴─ ─ ─ ─┘
//! ```
//!
//! The time is a big-endian 64-bit PPU cycle count. Observables follow in name
//! order, each aligned to its element size, or to a vector row when laid out
//! as a complete row. The record size is rounded up to 128 bytes when any
//! complete row is present and to 8 bytes otherwise. Both hemispheres record
//! the same layout; the output port carries the top record followed by the
//! bottom record, restricted to the data interval.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use sigflow_hw::chip::ReadoutSource;
use sigflow_hw::coord::{Hemisphere, NeuronColumn};
use sigflow_hw::ppu::{VECTOR_ALIGNMENT, VECTOR_ROW_BYTES};

use super::{Vertex, VertexProperties, invalid};
use crate::connection_type::ConnectionType;
use crate::data::{TimedData, TimedDataSequence};
use crate::error::{DataError, Result};
use crate::port::{Port, PortRestriction};

/// Bytes of the time stamp at the begin of a timed record.
pub const TIME_STAMP_BYTES: usize = 8;

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Periodic invocation of a rule, in PPU clock cycles relative to the
/// realtime interval begin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timer {
    /// First invocation.
    pub start: u32,
    /// Cycles between invocations.
    pub period: u32,
    /// Number of invocations.
    pub num_periods: u32,
}

/// Shape of a synapse view the kernel operates on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynapseViewShape {
    /// Number of synapse rows.
    pub num_rows: usize,
    /// Columns.
    pub columns: Vec<NeuronColumn>,
    /// Hemisphere.
    pub hemisphere: Hemisphere,
}

/// Shape of a neuron view the kernel operates on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronViewShape {
    /// Columns.
    pub columns: Vec<NeuronColumn>,
    /// Hemisphere.
    pub row: Hemisphere,
    /// Readout source the CADC samples per neuron, if any.
    pub neuron_readout_sources: Vec<Option<ReadoutSource>>,
}

/// Element type of a recorded observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// `i8`.
    Int8,
    /// `u8`.
    UInt8,
    /// `i16`.
    Int16,
    /// `u16`.
    UInt16,
}

impl ElementType {
    /// Size in bytes.
    pub const fn size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
        }
    }
}

/// Memory layout of a per-neuron observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeuronLayout {
    /// One vector row per neuron view, indexed by the vector-unit position
    /// of each column.
    CompleteRow,
    /// Only the view's columns, in view order.
    PackedActiveColumns,
}

/// Value recorded once per period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Observable {
    /// Fixed-size array.
    Array {
        /// Element type.
        element_type: ElementType,
        /// Number of elements.
        size: usize,
    },
    /// One value per neuron of every neuron view.
    PerNeuron {
        /// Element type.
        element_type: ElementType,
        /// Layout.
        layout: NeuronLayout,
    },
}

impl Observable {
    fn element_type(&self) -> ElementType {
        match self {
            Observable::Array { element_type, .. } | Observable::PerNeuron { element_type, .. } => {
                *element_type
            }
        }
    }

    fn is_complete_row(&self) -> bool {
        matches!(
            self,
            Observable::PerNeuron {
                layout: NeuronLayout::CompleteRow,
                ..
            }
        )
    }
}

/// Recording of a rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recording {
    /// One untyped block per batch entry, written by the kernel at will.
    Raw {
        /// Block size in bytes.
        scratchpad_memory_size: usize,
    },
    /// One typed record per period.
    Timed {
        /// Observables by name.
        observables: BTreeMap<String, Observable>,
    },
}

/// Decoded observable values: per batch entry, one sample per period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObservableData {
    /// `i8` values.
    Int8(Vec<TimedDataSequence<Vec<i8>>>),
    /// `u8` values.
    UInt8(Vec<TimedDataSequence<Vec<u8>>>),
    /// `i16` values.
    Int16(Vec<TimedDataSequence<Vec<i16>>>),
    /// `u16` values.
    UInt16(Vec<TimedDataSequence<Vec<u16>>>),
}

/// Decoded timed recording.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimedRecordingData {
    /// Per-neuron observables, one entry per neuron view.
    pub data_per_neuron: BTreeMap<String, Vec<ObservableData>>,
    /// Array observables; top hemisphere values followed by bottom.
    pub data_array: BTreeMap<String, ObservableData>,
}

/// Decoded recording of a rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordingData {
    /// Raw block per batch entry, top then bottom hemisphere.
    Raw(Vec<Vec<i8>>),
    /// Timed observables.
    Timed(TimedRecordingData),
}

trait Element: Sized {
    const SIZE: usize;
    fn from_be(bytes: &[u8]) -> Self;
}

macro_rules! element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const SIZE: usize = std::mem::size_of::<$t>();
                fn from_be(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_be_bytes(raw)
                }
            }
        )*
    };
}

element!(i8, u8, i16, u16);

/// Extracts elements at byte offsets from every sample.
fn extract<T: Element>(
    data: &[TimedDataSequence<Vec<i8>>],
    offsets: &[usize],
) -> Vec<TimedDataSequence<Vec<T>>> {
    data.iter()
        .map(|batch| {
            batch
                .iter()
                .map(|sample| {
                    #[allow(clippy::cast_sign_loss)]
                    let bytes: Vec<u8> = sample.data.iter().map(|&b| b as u8).collect();
                    let values = offsets
                        .iter()
                        .map(|&o| T::from_be(&bytes[o..o + T::SIZE]))
                        .collect();
                    TimedData::new(sample.time, values)
                })
                .collect()
        })
        .collect()
}

fn extract_typed(
    element_type: ElementType,
    data: &[TimedDataSequence<Vec<i8>>],
    offsets: &[usize],
) -> ObservableData {
    match element_type {
        ElementType::Int8 => ObservableData::Int8(extract(data, offsets)),
        ElementType::UInt8 => ObservableData::UInt8(extract(data, offsets)),
        ElementType::Int16 => ObservableData::Int16(extract(data, offsets)),
        ElementType::UInt16 => ObservableData::UInt16(extract(data, offsets)),
    }
}

const fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// Periodic PPU kernel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlasticityRule {
    kernel: String,
    timer: Timer,
    synapse_view_shapes: Vec<SynapseViewShape>,
    neuron_view_shapes: Vec<NeuronViewShape>,
    recording: Option<Recording>,
    id: u32,
}

impl PlasticityRule {
    /// Creates the rule with a process-unique id.
    ///
    /// The recorded memory size must be a multiple of four bytes.
    pub fn new(
        kernel: impl Into<String>,
        timer: Timer,
        synapse_view_shapes: Vec<SynapseViewShape>,
        neuron_view_shapes: Vec<NeuronViewShape>,
        recording: Option<Recording>,
    ) -> Result<Self> {
        for shape in &neuron_view_shapes {
            if shape.neuron_readout_sources.len() != shape.columns.len() {
                return Err(invalid(
                    Self::NAME,
                    "readout sources do not match neuron view columns",
                ));
            }
        }
        if timer.num_periods > 0 && timer.period == 0 {
            return Err(invalid(Self::NAME, "timer period must be positive"));
        }
        let rule = Self {
            kernel: kernel.into(),
            timer,
            synapse_view_shapes,
            neuron_view_shapes,
            recording,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        };
        let size = rule.recorded_scratchpad_memory_size();
        if size % 4 != 0 {
            return Err(DataError::UnalignedRecording(size).into());
        }
        Ok(rule)
    }

    /// Kernel source.
    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    /// Invocation timer.
    pub fn timer(&self) -> Timer {
        self.timer
    }

    /// Synapse view shapes, one per synapse input.
    pub fn synapse_view_shapes(&self) -> &[SynapseViewShape] {
        &self.synapse_view_shapes
    }

    /// Neuron view shapes, one per neuron input.
    pub fn neuron_view_shapes(&self) -> &[NeuronViewShape] {
        &self.neuron_view_shapes
    }

    /// Recording, if any.
    pub fn recording(&self) -> Option<&Recording> {
        self.recording.as_ref()
    }

    /// Identifier used to name the rule's PPU symbols.
    pub fn id(&self) -> u32 {
        self.id
    }

    fn observable_size(&self, observable: &Observable) -> usize {
        let element = observable.element_type().size();
        match observable {
            Observable::Array { size, .. } => size * element,
            Observable::PerNeuron {
                layout: NeuronLayout::CompleteRow,
                ..
            } => self.neuron_view_shapes.len() * element * NeuronColumn::SIZE,
            Observable::PerNeuron {
                layout: NeuronLayout::PackedActiveColumns,
                ..
            } => {
                self.neuron_view_shapes
                    .iter()
                    .map(|s| s.columns.len())
                    .sum::<usize>()
                    * element
            }
        }
    }

    fn observable_alignment(observable: &Observable) -> usize {
        if observable.is_complete_row() {
            VECTOR_ALIGNMENT
        } else {
            observable.element_type().size()
        }
    }

    /// Alignment of a record: a vector row with any complete-row
    /// observable, the time stamp size otherwise.
    pub fn recorded_scratchpad_memory_alignment(&self) -> usize {
        match &self.recording {
            Some(Recording::Timed { observables })
                if observables.values().any(Observable::is_complete_row) =>
            {
                VECTOR_ALIGNMENT
            }
            Some(_) => TIME_STAMP_BYTES,
            None => 0,
        }
    }

    /// Bytes per hemisphere of one record.
    pub fn recorded_scratchpad_memory_size(&self) -> usize {
        match &self.recording {
            None => 0,
            Some(Recording::Raw {
                scratchpad_memory_size,
            }) => *scratchpad_memory_size,
            Some(Recording::Timed { observables }) => {
                let end = observables.values().fold(TIME_STAMP_BYTES, |size, o| {
                    round_up(size, Self::observable_alignment(o)) + self.observable_size(o)
                });
                round_up(end, self.recorded_scratchpad_memory_alignment())
            }
        }
    }

    /// Byte interval `[begin, end)` of a record exposed on the output.
    pub fn recorded_memory_data_interval(&self) -> (usize, usize) {
        match &self.recording {
            None => (0, 0),
            Some(Recording::Raw {
                scratchpad_memory_size,
            }) => (0, *scratchpad_memory_size),
            Some(Recording::Timed { observables }) => match observables.values().next() {
                None => (TIME_STAMP_BYTES, TIME_STAMP_BYTES),
                Some(first) => {
                    let begin = if first.is_complete_row() {
                        VECTOR_ALIGNMENT
                    } else {
                        TIME_STAMP_BYTES
                    };
                    (begin, self.recorded_scratchpad_memory_size())
                }
            },
        }
    }

    /// Byte interval per observable, relative to the data interval begin.
    pub fn recorded_memory_timed_data_intervals(
        &self,
    ) -> std::result::Result<BTreeMap<String, (usize, usize)>, DataError> {
        let Some(Recording::Timed { observables }) = &self.recording else {
            return Err(DataError::NoRecording);
        };
        let (absolute_begin, _) = self.recorded_memory_data_interval();
        let mut begin = TIME_STAMP_BYTES;
        let mut intervals = BTreeMap::new();
        for (name, observable) in observables {
            begin = round_up(begin, Self::observable_alignment(observable));
            let end = begin + self.observable_size(observable);
            intervals.insert(name.clone(), (begin - absolute_begin, end - absolute_begin));
            begin = end;
        }
        Ok(intervals)
    }

    /// Decodes the rule's output into observables.
    ///
    /// `data` holds, per batch entry, the samples of the output port.
    pub fn extract_recording_data(
        &self,
        data: &[TimedDataSequence<Vec<i8>>],
    ) -> std::result::Result<RecordingData, DataError> {
        let Some(recording) = &self.recording else {
            return Err(DataError::NoRecording);
        };
        let expected = self.output().size;
        for sample in data.iter().flatten() {
            if sample.data.len() != expected {
                return Err(DataError::SizeMismatch {
                    what: "recording sample",
                    left: sample.data.len(),
                    right: expected,
                });
            }
        }
        let observables = match recording {
            Recording::Raw { .. } => {
                return data
                    .iter()
                    .map(|batch| match batch.as_slice() {
                        [sample] => Ok(sample.data.clone()),
                        _ => Err(DataError::SizeMismatch {
                            what: "raw recording samples per batch entry",
                            left: batch.len(),
                            right: 1,
                        }),
                    })
                    .collect::<std::result::Result<_, _>>()
                    .map(RecordingData::Raw);
            }
            Recording::Timed { observables } => observables,
        };

        let half = expected / 2;
        let intervals = self.recorded_memory_timed_data_intervals()?;
        let mut out = TimedRecordingData::default();
        for (name, observable) in observables {
            let (begin, _) = intervals[name];
            let element = observable.element_type();
            let size = element.size();
            match observable {
                Observable::Array { size: n, .. } => {
                    let offsets: Vec<usize> = [0, half]
                        .into_iter()
                        .flat_map(|h| (0..*n).map(move |i| h + begin + i * size))
                        .collect();
                    out.data_array
                        .insert(name.clone(), extract_typed(element, data, &offsets));
                }
                Observable::PerNeuron { layout, .. } => {
                    let mut packed = 0;
                    let per_view = self
                        .neuron_view_shapes
                        .iter()
                        .enumerate()
                        .map(|(view, shape)| {
                            let hemisphere = shape.row.value() * half;
                            let offsets: Vec<usize> = shape
                                .columns
                                .iter()
                                .enumerate()
                                .map(|(i, column)| {
                                    let position = match layout {
                                        NeuronLayout::CompleteRow => {
                                            view * VECTOR_ROW_BYTES
                                                + (column.value() % 2) * VECTOR_ALIGNMENT
                                                + column.value() / 2
                                        }
                                        NeuronLayout::PackedActiveColumns => packed + i,
                                    };
                                    hemisphere + begin + position * size
                                })
                                .collect();
                            packed += shape.columns.len();
                            extract_typed(element, data, &offsets)
                        })
                        .collect();
                    out.data_per_neuron.insert(name.clone(), per_view);
                }
            }
        }
        Ok(RecordingData::Timed(out))
    }
}

impl VertexProperties for PlasticityRule {
    const NAME: &'static str = "PlasticityRule";

    fn inputs(&self) -> Vec<Port> {
        self.synapse_view_shapes
            .iter()
            .map(|s| Port::new(s.columns.len(), ConnectionType::SynapticInput))
            .chain(
                self.neuron_view_shapes
                    .iter()
                    .map(|s| Port::new(s.columns.len(), ConnectionType::MembraneVoltage)),
            )
            .collect()
    }

    fn output(&self) -> Port {
        let (begin, end) = self.recorded_memory_data_interval();
        Port::new((end - begin) * 2, ConnectionType::Int8)
    }

    fn supports_input_from(&self, source: &Vertex, restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::SynapseArrayView(_)
            | Vertex::SynapseArrayViewSparse(_)
            | Vertex::NeuronView(_) => restriction.is_none(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow_hw::FpgaTime;

    fn neuron_shape(columns: &[usize], row: Hemisphere) -> NeuronViewShape {
        NeuronViewShape {
            columns: columns.iter().map(|&c| NeuronColumn::new(c)).collect(),
            row,
            neuron_readout_sources: vec![None; columns.len()],
        }
    }

    fn timed(observables: &[(&str, Observable)], shapes: Vec<NeuronViewShape>) -> PlasticityRule {
        PlasticityRule::new(
            "kernel",
            Timer {
                start: 0,
                period: 1000,
                num_periods: 3,
            },
            vec![],
            shapes,
            Some(Recording::Timed {
                observables: observables
                    .iter()
                    .map(|(n, o)| ((*n).to_owned(), *o))
                    .collect(),
            }),
        )
        .unwrap()
    }

    #[test]
    fn timed_sizes_follow_alignment_rules() {
        let rule = timed(
            &[(
                "a",
                Observable::Array {
                    element_type: ElementType::UInt16,
                    size: 3,
                },
            )],
            vec![],
        );
        // 8 + 6 = 14, rounded to 16.
        assert_eq!(rule.recorded_scratchpad_memory_size(), 16);
        assert_eq!(rule.recorded_memory_data_interval(), (8, 16));
        assert_eq!(rule.output().size, 16);

        let rule = timed(
            &[(
                "v",
                Observable::PerNeuron {
                    element_type: ElementType::Int8,
                    layout: NeuronLayout::CompleteRow,
                },
            )],
            vec![neuron_shape(&[0, 1], Hemisphere::Top)],
        );
        assert_eq!(rule.recorded_scratchpad_memory_alignment(), 128);
        assert_eq!(rule.recorded_scratchpad_memory_size(), 128 + 256);
        assert_eq!(rule.recorded_memory_data_interval(), (128, 384));
    }

    #[test]
    fn unaligned_raw_recording_is_rejected() {
        let err = PlasticityRule::new(
            "k",
            Timer::default(),
            vec![],
            vec![],
            Some(Recording::Raw {
                scratchpad_memory_size: 6,
            }),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::GraphError::Data(DataError::UnalignedRecording(6))
        ));
    }

    #[test]
    fn extracts_packed_neuron_and_array_observables() {
        let rule = timed(
            &[
                (
                    "a",
                    Observable::Array {
                        element_type: ElementType::Int8,
                        size: 2,
                    },
                ),
                (
                    "v",
                    Observable::PerNeuron {
                        element_type: ElementType::UInt16,
                        layout: NeuronLayout::PackedActiveColumns,
                    },
                ),
            ],
            vec![neuron_shape(&[5, 9], Hemisphere::Bottom)],
        );
        let intervals = rule.recorded_memory_timed_data_intervals().unwrap();
        assert_eq!(intervals["a"], (0, 2));
        assert_eq!(intervals["v"], (2, 6));
        let size = rule.output().size;
        assert_eq!(size, 16);

        let mut sample = vec![0i8; size];
        let half = size / 2;
        sample[0] = 1;
        sample[1] = -2;
        sample[half] = 3;
        sample[half + 1] = 4;
        // Bottom hemisphere neuron values 0x0102 and 0x0304.
        sample[half + 2] = 1;
        sample[half + 3] = 2;
        sample[half + 4] = 3;
        sample[half + 5] = 4;
        let data = vec![vec![TimedData::new(FpgaTime(7), sample)]];

        let RecordingData::Timed(out) = rule.extract_recording_data(&data).unwrap() else {
            panic!("expected timed recording");
        };
        assert_eq!(
            out.data_array["a"],
            ObservableData::Int8(vec![vec![TimedData::new(FpgaTime(7), vec![1, -2, 3, 4])]])
        );
        assert_eq!(
            out.data_per_neuron["v"],
            vec![ObservableData::UInt16(vec![vec![TimedData::new(
                FpgaTime(7),
                vec![0x0102, 0x0304]
            )]])]
        );
    }

    #[test]
    fn raw_extraction_requires_one_sample() {
        let rule = PlasticityRule::new(
            "k",
            Timer::default(),
            vec![],
            vec![],
            Some(Recording::Raw {
                scratchpad_memory_size: 4,
            }),
        )
        .unwrap();
        let sample = TimedData::new(FpgaTime::ZERO, vec![1i8; 8]);
        assert_eq!(
            rule.extract_recording_data(&[vec![sample.clone()]]).unwrap(),
            RecordingData::Raw(vec![vec![1; 8]])
        );
        assert!(rule.extract_recording_data(&[vec![sample.clone(), sample]]).is_err());
    }

    #[test]
    fn ids_are_unique() {
        let a = PlasticityRule::new("k", Timer::default(), vec![], vec![], None).unwrap();
        let b = PlasticityRule::new("k", Timer::default(), vec![], vec![], None).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.output().size, 0);
    }
}
