//! Host-side transformations between execution instances.

use serde::{Deserialize, Serialize};

use super::{VertexProperties, invalid};
use crate::connection_type::ConnectionType;
use crate::data::{DataEntry, TimedData, TimedDataSequence};
use crate::error::{DataError, Result};
use crate::port::Port;

/// Function computed by a [`Transformation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformationFunction {
    /// Concatenates vectors of one type.
    Concatenation {
        /// Host-data type of all inputs and the output.
        connection_type: ConnectionType,
        /// Size of every input.
        sizes: Vec<usize>,
    },
    /// Saturating elementwise sum of `Int8` vectors.
    Addition {
        /// Number of inputs.
        num_inputs: usize,
        /// Vector size.
        size: usize,
    },
    /// Saturating elementwise difference: first input minus all others.
    Subtraction {
        /// Number of inputs.
        num_inputs: usize,
        /// Vector size.
        size: usize,
    },
    /// Index of the first maximum.
    ArgMax {
        /// Vector size.
        size: usize,
        /// Host-data type of the input.
        connection_type: ConnectionType,
    },
    /// `Int8` to `UInt5` conversion: negative values become zero, the rest
    /// is shifted right and clamped to 31.
    ConvertingRelu {
        /// Vector size.
        size: usize,
        /// Right shift.
        shift: u32,
    },
}

const VECTOR_TYPES: [ConnectionType; 3] = [
    ConnectionType::DataUInt32,
    ConnectionType::DataUInt5,
    ConnectionType::DataInt8,
];

/// Combines the samples of several batched inputs elementwise.
///
/// Every input must have the same batch size and, per batch entry, the same
/// number of samples. Sample times are taken from the first input.
fn zip_samples<T: Clone, U>(
    inputs: &[&Vec<TimedDataSequence<Vec<T>>>],
    mut f: impl FnMut(&[&Vec<T>]) -> U,
) -> std::result::Result<Vec<TimedDataSequence<U>>, DataError> {
    let Some(first) = inputs.first() else {
        return Ok(Vec::new());
    };
    for other in &inputs[1..] {
        if other.len() != first.len() {
            return Err(DataError::SizeMismatch {
                what: "transformation input batch size",
                left: first.len(),
                right: other.len(),
            });
        }
    }
    (0..first.len())
        .map(|b| {
            let samples = first[b].len();
            for other in &inputs[1..] {
                if other[b].len() != samples {
                    return Err(DataError::SizeMismatch {
                        what: "transformation input samples",
                        left: samples,
                        right: other[b].len(),
                    });
                }
            }
            Ok((0..samples)
                .map(|s| {
                    let values: Vec<&Vec<T>> = inputs.iter().map(|i| &i[b][s].data).collect();
                    TimedData::new(first[b][s].time, f(&values))
                })
                .collect())
        })
        .collect()
}

macro_rules! collect_variant {
    ($inputs:expr, $variant:ident, $operation:expr) => {
        $inputs
            .iter()
            .map(|entry| match entry {
                DataEntry::$variant(v) => Ok(v),
                other => Err(DataError::UnexpectedEntry {
                    found: entry_name(other),
                    operation: $operation,
                }),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
    };
}

fn entry_name(entry: &DataEntry) -> &'static str {
    match entry {
        DataEntry::UInt32(_) => "UInt32",
        DataEntry::UInt5(_) => "UInt5",
        DataEntry::Int8(_) => "Int8",
        DataEntry::SpikesToChip(_) => "SpikesToChip",
        DataEntry::SpikesFromChip(_) => "SpikesFromChip",
        DataEntry::MadcSamples(_) => "MadcSamples",
    }
}

fn argmax<T: PartialOrd + Copy>(values: &[T]) -> u32 {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    u32::try_from(best).unwrap_or(u32::MAX)
}

impl TransformationFunction {
    /// Input ports.
    pub fn inputs(&self) -> Vec<Port> {
        match self {
            TransformationFunction::Concatenation {
                connection_type,
                sizes,
            } => sizes.iter().map(|&s| Port::new(s, *connection_type)).collect(),
            TransformationFunction::Addition { num_inputs, size }
            | TransformationFunction::Subtraction { num_inputs, size } => {
                vec![Port::new(*size, ConnectionType::DataInt8); *num_inputs]
            }
            TransformationFunction::ArgMax {
                size,
                connection_type,
            } => vec![Port::new(*size, *connection_type)],
            TransformationFunction::ConvertingRelu { size, .. } => {
                vec![Port::new(*size, ConnectionType::DataInt8)]
            }
        }
    }

    /// Output port.
    pub fn output(&self) -> Port {
        match self {
            TransformationFunction::Concatenation {
                connection_type,
                sizes,
            } => Port::new(sizes.iter().sum(), *connection_type),
            TransformationFunction::Addition { size, .. }
            | TransformationFunction::Subtraction { size, .. } => {
                Port::new(*size, ConnectionType::DataInt8)
            }
            TransformationFunction::ArgMax { .. } => Port::new(1, ConnectionType::DataUInt32),
            TransformationFunction::ConvertingRelu { size, .. } => {
                Port::new(*size, ConnectionType::DataUInt5)
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TransformationFunction::Concatenation { .. } => "concatenation",
            TransformationFunction::Addition { .. } => "addition",
            TransformationFunction::Subtraction { .. } => "subtraction",
            TransformationFunction::ArgMax { .. } => "argmax",
            TransformationFunction::ConvertingRelu { .. } => "converting relu",
        }
    }

    /// Computes the output from the inputs, in port order.
    pub fn apply(&self, inputs: &[&DataEntry]) -> std::result::Result<DataEntry, DataError> {
        let expected = self.inputs().len();
        if inputs.len() != expected {
            return Err(DataError::SizeMismatch {
                what: "transformation inputs",
                left: inputs.len(),
                right: expected,
            });
        }
        let operation = self.name();
        Ok(match self {
            TransformationFunction::Concatenation { .. } => match inputs.first() {
                Some(DataEntry::UInt32(_)) => DataEntry::UInt32(zip_samples(
                    &collect_variant!(inputs, UInt32, operation)?,
                    |v| v.iter().flat_map(|s| s.iter().copied()).collect(),
                )?),
                Some(DataEntry::UInt5(_)) => DataEntry::UInt5(zip_samples(
                    &collect_variant!(inputs, UInt5, operation)?,
                    |v| v.iter().flat_map(|s| s.iter().copied()).collect(),
                )?),
                Some(DataEntry::Int8(_)) => DataEntry::Int8(zip_samples(
                    &collect_variant!(inputs, Int8, operation)?,
                    |v| v.iter().flat_map(|s| s.iter().copied()).collect(),
                )?),
                Some(other) => {
                    return Err(DataError::UnexpectedEntry {
                        found: entry_name(other),
                        operation,
                    });
                }
                None => DataEntry::Int8(Vec::new()),
            },
            TransformationFunction::Addition { .. } => {
                let inputs = collect_variant!(inputs, Int8, operation)?;
                DataEntry::Int8(zip_samples(&inputs, |v| {
                    let mut acc = v[0].clone();
                    for other in &v[1..] {
                        for (a, b) in acc.iter_mut().zip(other.iter()) {
                            *a = a.saturating_add(*b);
                        }
                    }
                    acc
                })?)
            }
            TransformationFunction::Subtraction { .. } => {
                let inputs = collect_variant!(inputs, Int8, operation)?;
                DataEntry::Int8(zip_samples(&inputs, |v| {
                    let mut acc = v[0].clone();
                    for other in &v[1..] {
                        for (a, b) in acc.iter_mut().zip(other.iter()) {
                            *a = a.saturating_sub(*b);
                        }
                    }
                    acc
                })?)
            }
            TransformationFunction::ArgMax { .. } => match inputs[0] {
                DataEntry::UInt32(v) => {
                    DataEntry::UInt32(zip_samples(&[v], |s| vec![argmax(s[0])])?)
                }
                DataEntry::UInt5(v) => DataEntry::UInt32(zip_samples(&[v], |s| vec![argmax(s[0])])?),
                DataEntry::Int8(v) => DataEntry::UInt32(zip_samples(&[v], |s| vec![argmax(s[0])])?),
                other => {
                    return Err(DataError::UnexpectedEntry {
                        found: entry_name(other),
                        operation,
                    });
                }
            },
            TransformationFunction::ConvertingRelu { shift, .. } => {
                let inputs = collect_variant!(inputs, Int8, operation)?;
                DataEntry::UInt5(zip_samples(&inputs, |v| {
                    v[0].iter()
                        .map(|&x| {
                            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                            let value = (i32::from(x).max(0) >> shift).min(31) as u8;
                            value
                        })
                        .collect()
                })?)
            }
        })
    }
}

/// Host-side computation on data of finished execution instances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    function: TransformationFunction,
}

impl Transformation {
    /// Creates the vertex.
    pub fn new(function: TransformationFunction) -> Result<Self> {
        match &function {
            TransformationFunction::Concatenation {
                connection_type, ..
            }
            | TransformationFunction::ArgMax {
                connection_type, ..
            } if !VECTOR_TYPES.contains(connection_type) => {
                return Err(invalid(
                    Self::NAME,
                    format!("{connection_type:?} is not a host vector type"),
                ));
            }
            TransformationFunction::Addition { num_inputs: 0, .. }
            | TransformationFunction::Subtraction { num_inputs: 0, .. } => {
                return Err(invalid(Self::NAME, "at least one input required"));
            }
            _ => {}
        }
        Ok(Self { function })
    }

    /// Function computed.
    pub fn function(&self) -> &TransformationFunction {
        &self.function
    }

    /// Computes the output from the inputs, in port order.
    pub fn apply(&self, inputs: &[&DataEntry]) -> std::result::Result<DataEntry, DataError> {
        self.function.apply(inputs)
    }
}

impl VertexProperties for Transformation {
    const NAME: &'static str = "Transformation";

    fn inputs(&self) -> Vec<Port> {
        self.function.inputs()
    }

    fn output(&self) -> Port {
        self.function.output()
    }

    fn can_connect_different_execution_instances(&self) -> bool {
        true
    }
}
