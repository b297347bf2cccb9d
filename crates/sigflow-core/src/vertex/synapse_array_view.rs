//! Dense and sparse synapse array views.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sigflow_hw::chip::SynapseMatrix;
use sigflow_hw::coord::{Hemisphere, NeuronColumn, SynapseDriverOnHemisphere, SynapseRow};

use super::{Vertex, VertexProperties, all_unique, invalid};
use crate::connection_type::ConnectionType;
use crate::error::Result;
use crate::port::{Port, PortRestriction};

fn drivers_of(rows: &[SynapseRow]) -> Vec<SynapseDriverOnHemisphere> {
    rows.iter()
        .map(|r| r.driver())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn accepts_driver(synram: Hemisphere, rows: &[SynapseRow], source: &Vertex) -> bool {
    match source {
        Vertex::SynapseDriver(d) => {
            d.coordinate().hemisphere == synram && drivers_of(rows).contains(&d.coordinate().driver)
        }
        _ => true,
    }
}

fn check_rows_and_columns(
    kind: &'static str,
    rows: &[SynapseRow],
    columns: &[NeuronColumn],
) -> Result<()> {
    if rows.is_empty() || columns.is_empty() {
        return Err(invalid(kind, "rows and columns must not be empty"));
    }
    if !all_unique(rows) {
        return Err(invalid(kind, "rows are not unique"));
    }
    if !all_unique(columns) {
        return Err(invalid(kind, "columns are not unique"));
    }
    Ok(())
}

/// Dense block of synapses: every `(row, column)` pair has a weight and a label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynapseArrayView {
    synram: Hemisphere,
    rows: Vec<SynapseRow>,
    columns: Vec<NeuronColumn>,
    weights: Vec<Vec<u8>>,
    labels: Vec<Vec<u8>>,
}

impl SynapseArrayView {
    /// Creates the vertex; `weights` and `labels` are indexed `[row][column]`.
    pub fn new(
        synram: Hemisphere,
        rows: Vec<SynapseRow>,
        columns: Vec<NeuronColumn>,
        weights: Vec<Vec<u8>>,
        labels: Vec<Vec<u8>>,
    ) -> Result<Self> {
        check_rows_and_columns(Self::NAME, &rows, &columns)?;
        for (what, matrix, max) in [
            ("weights", &weights, SynapseMatrix::MAX_WEIGHT),
            ("labels", &labels, SynapseMatrix::MAX_LABEL),
        ] {
            if matrix.len() != rows.len() || matrix.iter().any(|r| r.len() != columns.len()) {
                return Err(invalid(Self::NAME, format!("{what} shape does not match rows x columns")));
            }
            if matrix.iter().flatten().any(|&v| v > max) {
                return Err(invalid(Self::NAME, format!("{what} exceed {max}")));
            }
        }
        Ok(Self {
            synram,
            rows,
            columns,
            weights,
            labels,
        })
    }

    /// Hemisphere of the synapse matrix.
    pub fn synram(&self) -> Hemisphere {
        self.synram
    }

    /// Rows.
    pub fn rows(&self) -> &[SynapseRow] {
        &self.rows
    }

    /// Columns.
    pub fn columns(&self) -> &[NeuronColumn] {
        &self.columns
    }

    /// Weights, `[row][column]`.
    pub fn weights(&self) -> &[Vec<u8>] {
        &self.weights
    }

    /// Labels, `[row][column]`.
    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    /// Synapse drivers feeding the rows, ascending.
    pub fn drivers(&self) -> Vec<SynapseDriverOnHemisphere> {
        drivers_of(&self.rows)
    }
}

impl VertexProperties for SynapseArrayView {
    const NAME: &'static str = "SynapseArrayView";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::SynapseInputLabel); self.drivers().len()]
    }

    fn output(&self) -> Port {
        Port::new(self.columns.len(), ConnectionType::SynapticInput)
    }

    fn supports_input_from(&self, source: &Vertex, _restriction: Option<&PortRestriction>) -> bool {
        accepts_driver(self.synram, &self.rows, source)
    }
}

/// One synapse of a [`SynapseArrayViewSparse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseSynapse {
    /// 6-bit weight.
    pub weight: u8,
    /// 6-bit label.
    pub label: u8,
    /// Index into the view's rows.
    pub index_row: usize,
    /// Index into the view's columns.
    pub index_column: usize,
}

/// Sparse block of synapses; unlisted pairs keep weight zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynapseArrayViewSparse {
    synram: Hemisphere,
    rows: Vec<SynapseRow>,
    columns: Vec<NeuronColumn>,
    synapses: Vec<SparseSynapse>,
}

impl SynapseArrayViewSparse {
    /// Creates the vertex.
    pub fn new(
        synram: Hemisphere,
        rows: Vec<SynapseRow>,
        columns: Vec<NeuronColumn>,
        synapses: Vec<SparseSynapse>,
    ) -> Result<Self> {
        check_rows_and_columns(Self::NAME, &rows, &columns)?;
        for s in &synapses {
            if s.index_row >= rows.len() || s.index_column >= columns.len() {
                return Err(invalid(Self::NAME, "synapse index out of range"));
            }
            if s.weight > SynapseMatrix::MAX_WEIGHT || s.label > SynapseMatrix::MAX_LABEL {
                return Err(invalid(Self::NAME, "synapse weight or label out of range"));
            }
        }
        Ok(Self {
            synram,
            rows,
            columns,
            synapses,
        })
    }

    /// Hemisphere of the synapse matrix.
    pub fn synram(&self) -> Hemisphere {
        self.synram
    }

    /// Rows.
    pub fn rows(&self) -> &[SynapseRow] {
        &self.rows
    }

    /// Columns.
    pub fn columns(&self) -> &[NeuronColumn] {
        &self.columns
    }

    /// Synapses.
    pub fn synapses(&self) -> &[SparseSynapse] {
        &self.synapses
    }

    /// Synapse drivers feeding the rows, ascending.
    pub fn drivers(&self) -> Vec<SynapseDriverOnHemisphere> {
        drivers_of(&self.rows)
    }
}

impl VertexProperties for SynapseArrayViewSparse {
    const NAME: &'static str = "SynapseArrayViewSparse";

    fn inputs(&self) -> Vec<Port> {
        vec![Port::new(1, ConnectionType::SynapseInputLabel); self.drivers().len()]
    }

    fn output(&self) -> Port {
        Port::new(self.columns.len(), ConnectionType::SynapticInput)
    }

    fn supports_input_from(&self, source: &Vertex, _restriction: Option<&PortRestriction>) -> bool {
        accepts_driver(self.synram, &self.rows, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(r: &[usize]) -> Vec<SynapseRow> {
        r.iter().map(|&i| SynapseRow::new(i)).collect()
    }

    fn columns(c: &[usize]) -> Vec<NeuronColumn> {
        c.iter().map(|&i| NeuronColumn::new(i)).collect()
    }

    #[test]
    fn one_input_per_distinct_driver() {
        let view = SynapseArrayView::new(
            Hemisphere::Top,
            rows(&[0, 1, 4]),
            columns(&[0, 1]),
            vec![vec![1, 2]; 3],
            vec![vec![0, 0]; 3],
        )
        .unwrap();
        assert_eq!(view.inputs().len(), 2);
        assert_eq!(view.output(), Port::new(2, ConnectionType::SynapticInput));
    }

    #[test]
    fn rejects_bad_shapes_and_values() {
        assert!(SynapseArrayView::new(
            Hemisphere::Top,
            rows(&[0]),
            columns(&[0, 1]),
            vec![vec![1]],
            vec![vec![0, 0]],
        )
        .is_err());
        assert!(SynapseArrayView::new(
            Hemisphere::Top,
            rows(&[0]),
            columns(&[0]),
            vec![vec![64]],
            vec![vec![0]],
        )
        .is_err());
        assert!(SynapseArrayViewSparse::new(
            Hemisphere::Top,
            rows(&[0]),
            columns(&[0]),
            vec![SparseSynapse {
                weight: 1,
                label: 0,
                index_row: 1,
                index_column: 0,
            }],
        )
        .is_err());
    }
}
