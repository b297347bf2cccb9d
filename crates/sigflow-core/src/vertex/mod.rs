//! Vertex catalog.
//!
//! The set of hardware primitives and host operations is closed, so
//! [`Vertex`] is a sum type. Each kind implements [`VertexProperties`],
//! which is everything the graph needs to type-check an edge:
//!
//! - ordered input ports; with [`variadic_input`](VertexProperties::variadic_input)
//!   the last port may repeat,
//! - exactly one output port,
//! - whether it may connect to a vertex of another execution instance,
//! - an optional source-specific acceptance predicate.
//!
//! The scheduler dispatches on the enum with exhaustive `match`es, so adding a
//! kind is a compile error everywhere a decision about it is needed.

mod background_spike_source;
mod cadc_membrane_readout_view;
mod crossbar_l2;
mod crossbar_node;
mod data;
mod madc_readout_view;
mod neuron_event_output_view;
mod neuron_view;
mod padi_bus;
pub mod plasticity_rule;
mod synapse_array_view;
mod synapse_driver;
pub mod transformation;

use serde::{Deserialize, Serialize};

use crate::port::{Port, PortRestriction};

pub use background_spike_source::BackgroundSpikeSource;
pub use cadc_membrane_readout_view::{CadcMembraneReadoutView, CadcMode};
pub use crossbar_l2::{CrossbarL2Input, CrossbarL2Output};
pub use crossbar_node::CrossbarNode;
pub use data::{DataInput, DataOutput, ExternalInput};
pub use madc_readout_view::{MadcReadoutView, MadcSource, SourceSelection};
pub use neuron_event_output_view::NeuronEventOutputView;
pub use neuron_view::{NeuronView, NeuronViewConfig};
pub use padi_bus::PadiBus;
pub use plasticity_rule::PlasticityRule;
pub use synapse_array_view::{SparseSynapse, SynapseArrayView, SynapseArrayViewSparse};
pub use synapse_driver::SynapseDriver;
pub use transformation::{Transformation, TransformationFunction};

/// Port and connectivity description shared by all vertex kinds.
pub trait VertexProperties {
    /// Kind name used in diagnostics and serialization.
    const NAME: &'static str;

    /// Declared input ports.
    fn inputs(&self) -> Vec<Port>;

    /// Output port.
    fn output(&self) -> Port;

    /// Whether the last input port may be repeated.
    fn variadic_input(&self) -> bool {
        false
    }

    /// Whether edges of crossable type to or from this vertex may (and must)
    /// connect different execution instances.
    fn can_connect_different_execution_instances(&self) -> bool {
        false
    }

    /// Whether this vertex accepts `source` as an input, given the optional
    /// sub-range of its output used.
    fn supports_input_from(&self, _source: &Vertex, _restriction: Option<&PortRestriction>) -> bool {
        true
    }
}

/// Any vertex of a [`Graph`](crate::Graph).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Vertex {
    /// Host data entering an execution instance.
    DataInput(DataInput),
    /// Host data leaving an execution instance.
    DataOutput(DataOutput),
    /// Caller-supplied data.
    ExternalInput(ExternalInput),
    /// Host-side computation on data.
    Transformation(Transformation),
    /// Row of neurons.
    NeuronView(NeuronView),
    /// Dense synapse block.
    SynapseArrayView(SynapseArrayView),
    /// Sparse synapse block.
    SynapseArrayViewSparse(SynapseArrayViewSparse),
    /// Synapse driver.
    SynapseDriver(SynapseDriver),
    /// PADI bus.
    PadiBus(PadiBus),
    /// Crossbar node.
    CrossbarNode(CrossbarNode),
    /// Spike injection from the FPGA into the crossbar.
    CrossbarL2Input(CrossbarL2Input),
    /// Spike recording from the crossbar to the FPGA.
    CrossbarL2Output(CrossbarL2Output),
    /// On-chip background spike source.
    BackgroundSpikeSource(BackgroundSpikeSource),
    /// Neuron event outputs feeding the crossbar.
    NeuronEventOutputView(NeuronEventOutputView),
    /// CADC membrane readout.
    CadcMembraneReadoutView(CadcMembraneReadoutView),
    /// MADC membrane readout.
    MadcReadoutView(MadcReadoutView),
    /// PPU plasticity rule.
    PlasticityRule(PlasticityRule),
}

macro_rules! dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            Vertex::DataInput($v) => $body,
            Vertex::DataOutput($v) => $body,
            Vertex::ExternalInput($v) => $body,
            Vertex::Transformation($v) => $body,
            Vertex::NeuronView($v) => $body,
            Vertex::SynapseArrayView($v) => $body,
            Vertex::SynapseArrayViewSparse($v) => $body,
            Vertex::SynapseDriver($v) => $body,
            Vertex::PadiBus($v) => $body,
            Vertex::CrossbarNode($v) => $body,
            Vertex::CrossbarL2Input($v) => $body,
            Vertex::CrossbarL2Output($v) => $body,
            Vertex::BackgroundSpikeSource($v) => $body,
            Vertex::NeuronEventOutputView($v) => $body,
            Vertex::CadcMembraneReadoutView($v) => $body,
            Vertex::MadcReadoutView($v) => $body,
            Vertex::PlasticityRule($v) => $body,
        }
    };
}

fn name_of<T: VertexProperties>(_: &T) -> &'static str {
    T::NAME
}

impl Vertex {
    /// Kind name.
    pub fn name(&self) -> &'static str {
        dispatch!(self, v => name_of(v))
    }

    /// Declared input ports.
    pub fn inputs(&self) -> Vec<Port> {
        dispatch!(self, v => v.inputs())
    }

    /// Output port.
    pub fn output(&self) -> Port {
        dispatch!(self, v => v.output())
    }

    /// Whether the last input port may be repeated.
    pub fn variadic_input(&self) -> bool {
        dispatch!(self, v => v.variadic_input())
    }

    /// Whether the vertex may connect different execution instances.
    pub fn can_connect_different_execution_instances(&self) -> bool {
        dispatch!(self, v => v.can_connect_different_execution_instances())
    }

    /// Whether `source` is accepted as input.
    pub fn supports_input_from(&self, source: &Vertex, restriction: Option<&PortRestriction>) -> bool {
        dispatch!(self, v => v.supports_input_from(source, restriction))
    }

    /// Serialization format version of this kind.
    pub fn format_version(&self) -> u32 {
        match self {
            Vertex::CadcMembraneReadoutView(_) => 2,
            Vertex::PlasticityRule(_) => 1,
            _ => 0,
        }
    }
}

macro_rules! impl_from {
    ($($kind:ident),* $(,)?) => {
        $(
            impl From<$kind> for Vertex {
                fn from(v: $kind) -> Self {
                    Vertex::$kind(v)
                }
            }
        )*
    };
}

impl_from!(
    DataInput,
    DataOutput,
    ExternalInput,
    Transformation,
    NeuronView,
    SynapseArrayView,
    SynapseArrayViewSparse,
    SynapseDriver,
    PadiBus,
    CrossbarNode,
    CrossbarL2Input,
    CrossbarL2Output,
    BackgroundSpikeSource,
    NeuronEventOutputView,
    CadcMembraneReadoutView,
    MadcReadoutView,
    PlasticityRule,
);

/// Error for a vertex value that violates its own invariants.
pub(crate) fn invalid(kind: &'static str, reason: impl Into<String>) -> crate::error::GraphError {
    crate::error::GraphError::InvalidVertex {
        kind,
        reason: reason.into(),
    }
}

/// Whether `values` contains no duplicates.
pub(crate) fn all_unique<T: Ord + Clone>(values: &[T]) -> bool {
    let mut sorted = values.to_vec();
    sorted.sort();
    sorted.windows(2).all(|w| w[0] != w[1])
}

/// Columns of `columns` selected by an optional restriction.
pub(crate) fn restricted<'a, T>(columns: &'a [T], restriction: Option<&PortRestriction>) -> &'a [T] {
    match restriction {
        Some(r) if r.max < columns.len() && r.min <= r.max => &columns[r.min..=r.max],
        Some(_) => &[],
        None => columns,
    }
}
