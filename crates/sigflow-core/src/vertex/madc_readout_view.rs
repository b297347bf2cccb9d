//! MADC readout view.

use serde::{Deserialize, Serialize};
use sigflow_hw::chip::ReadoutSource;
use sigflow_hw::coord::AtomicNeuron;

use super::{Vertex, VertexProperties, invalid, restricted};
use crate::connection_type::ConnectionType;
use crate::error::Result;
use crate::port::{Port, PortRestriction};

/// Neuron and signal sampled by one MADC channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MadcSource {
    /// Sampled neuron.
    pub neuron: AtomicNeuron,
    /// Sampled signal.
    pub source: ReadoutSource,
}

/// Channel switching of a two-source MADC recording.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSelection {
    /// Channel sampled first.
    pub initial: u8,
    /// Samples taken before switching channel; zero disables switching.
    pub period: u16,
}

/// Recording of one or two neurons via the MADC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MadcReadoutView {
    first_source: MadcSource,
    second_source: Option<MadcSource>,
    source_selection: SourceSelection,
}

impl MadcReadoutView {
    /// Creates the vertex.
    pub fn new(
        first_source: MadcSource,
        second_source: Option<MadcSource>,
        source_selection: SourceSelection,
    ) -> Result<Self> {
        if source_selection.initial > 1 {
            return Err(invalid(Self::NAME, "initial channel must be 0 or 1"));
        }
        if second_source.is_none() && source_selection.initial != 0 {
            return Err(invalid(Self::NAME, "single-source recording starts on channel 0"));
        }
        if second_source.is_some_and(|s| s.neuron == first_source.neuron) {
            return Err(invalid(Self::NAME, "sources must be different neurons"));
        }
        Ok(Self {
            first_source,
            second_source,
            source_selection,
        })
    }

    /// First source.
    pub fn first_source(&self) -> MadcSource {
        self.first_source
    }

    /// Optional second source.
    pub fn second_source(&self) -> Option<MadcSource> {
        self.second_source
    }

    /// Channel switching.
    pub fn source_selection(&self) -> SourceSelection {
        self.source_selection
    }

    /// Sources in channel order.
    pub fn sources(&self) -> impl Iterator<Item = MadcSource> + '_ {
        std::iter::once(self.first_source).chain(self.second_source)
    }
}

impl VertexProperties for MadcReadoutView {
    const NAME: &'static str = "MADCReadoutView";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::MembraneVoltage); self.sources().count()]
    }

    fn output(&self) -> Port {
        Port::new(1, ConnectionType::TimedMADCSampleFromChipSequence)
    }

    fn supports_input_from(&self, source: &Vertex, restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::NeuronView(view) => match restricted(view.columns(), restriction) {
                [column] => self
                    .sources()
                    .any(|s| s.neuron == AtomicNeuron::new(view.row(), *column)),
                _ => false,
            },
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigflow_hw::coord::{Hemisphere, NeuronColumn};

    fn source(column: usize) -> MadcSource {
        MadcSource {
            neuron: AtomicNeuron::new(Hemisphere::Top, NeuronColumn::new(column)),
            source: ReadoutSource::Membrane,
        }
    }

    #[test]
    fn two_sources_two_inputs() {
        let view = MadcReadoutView::new(
            source(3),
            Some(source(4)),
            SourceSelection {
                initial: 1,
                period: 10,
            },
        )
        .unwrap();
        assert_eq!(view.inputs().len(), 2);
        assert_eq!(view.output().size, 1);
    }

    #[test]
    fn rejects_same_neuron_twice() {
        assert!(MadcReadoutView::new(source(3), Some(source(3)), SourceSelection::default()).is_err());
    }
}
