//! CADC membrane readout view.

use serde::{Deserialize, Serialize};
use sigflow_hw::chip::ReadoutSource;
use sigflow_hw::coord::{Hemisphere, NeuronColumn};

use super::{Vertex, VertexProperties, all_unique, invalid, restricted};
use crate::connection_type::ConnectionType;
use crate::error::Result;
use crate::port::{Port, PortRestriction};

/// How the CADC samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CadcMode {
    /// One sample per neuron after the realtime interval.
    #[default]
    Hagen,
    /// Continuous sampling by the PPU into external memory.
    Periodic,
    /// Continuous sampling by the PPU into external DRAM.
    PeriodicOnDram,
}

impl CadcMode {
    /// Whether the mode samples continuously during the realtime interval.
    pub const fn is_periodic(self) -> bool {
        !matches!(self, CadcMode::Hagen)
    }
}

/// Readout of neuron collections on one hemisphere via the CADC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadcMembraneReadoutView {
    columns: Vec<Vec<NeuronColumn>>,
    synram: Hemisphere,
    mode: CadcMode,
    sources: Vec<Vec<ReadoutSource>>,
}

impl CadcMembraneReadoutView {
    /// Creates the vertex. `sources` mirrors the shape of `columns`; columns
    /// are unique across all collections.
    pub fn new(
        columns: Vec<Vec<NeuronColumn>>,
        synram: Hemisphere,
        mode: CadcMode,
        sources: Vec<Vec<ReadoutSource>>,
    ) -> Result<Self> {
        if sources.len() != columns.len()
            || sources.iter().zip(&columns).any(|(s, c)| s.len() != c.len())
        {
            return Err(invalid(Self::NAME, "sources shape does not match columns"));
        }
        let flat: Vec<_> = columns.iter().flatten().copied().collect();
        if !all_unique(&flat) {
            return Err(invalid(Self::NAME, "columns are not unique"));
        }
        Ok(Self {
            columns,
            synram,
            mode,
            sources,
        })
    }

    /// Column collections, one per input port.
    pub fn columns(&self) -> &[Vec<NeuronColumn>] {
        &self.columns
    }

    /// Hemisphere read out.
    pub fn synram(&self) -> Hemisphere {
        self.synram
    }

    /// Sampling mode.
    pub fn mode(&self) -> CadcMode {
        self.mode
    }

    /// Readout source per neuron, same shape as [`columns`](Self::columns).
    pub fn sources(&self) -> &[Vec<ReadoutSource>] {
        &self.sources
    }

    /// All columns in output order.
    pub fn flat_columns(&self) -> impl Iterator<Item = NeuronColumn> + '_ {
        self.columns.iter().flatten().copied()
    }
}

impl VertexProperties for CadcMembraneReadoutView {
    const NAME: &'static str = "CADCMembraneReadoutView";

    fn inputs(&self) -> Vec<Port> {
        self.columns
            .iter()
            .map(|c| Port::new(c.len(), ConnectionType::MembraneVoltage))
            .collect()
    }

    fn output(&self) -> Port {
        Port::new(
            self.columns.iter().map(Vec::len).sum(),
            ConnectionType::Int8,
        )
    }

    fn supports_input_from(&self, source: &Vertex, restriction: Option<&PortRestriction>) -> bool {
        match source {
            Vertex::NeuronView(view) => {
                let columns = restricted(view.columns(), restriction);
                view.row() == self.synram && self.columns.iter().any(|c| c == columns)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_follow_collections() {
        let view = CadcMembraneReadoutView::new(
            vec![
                vec![NeuronColumn::new(0), NeuronColumn::new(1)],
                vec![NeuronColumn::new(7)],
            ],
            Hemisphere::Bottom,
            CadcMode::Periodic,
            vec![vec![ReadoutSource::Membrane; 2], vec![ReadoutSource::Membrane]],
        )
        .unwrap();
        assert_eq!(view.inputs().len(), 2);
        assert_eq!(view.output(), Port::new(3, ConnectionType::Int8));
        assert!(view.mode().is_periodic());
    }

    #[test]
    fn rejects_duplicate_columns() {
        assert!(
            CadcMembraneReadoutView::new(
                vec![vec![NeuronColumn::new(0)], vec![NeuronColumn::new(0)]],
                Hemisphere::Top,
                CadcMode::Hagen,
                vec![vec![ReadoutSource::Membrane]; 2],
            )
            .is_err()
        );
    }
}
