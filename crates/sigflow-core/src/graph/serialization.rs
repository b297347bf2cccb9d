//! JSON form of a [`Graph`].
//!
//! Every vertex record carries the format version of its kind and the graph
//! record carries its own. Reading rejects versions it does not know, so
//! files written by a newer layout fail loudly instead of decoding into
//! something else.

use std::io::{Read, Write};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Graph, Input, VertexData, VertexId};
use crate::error::{GraphError, Result};
use crate::execution_instance::ExecutionInstanceId;
use crate::port::PortRestriction;
use crate::vertex::Vertex;

/// Format version of the graph record.
pub const GRAPH_FORMAT_VERSION: u32 = 0;

#[derive(Serialize, Deserialize)]
struct VertexRecord {
    version: u32,
    execution_instance: ExecutionInstanceId,
    vertex: Vertex,
}

#[derive(Serialize, Deserialize)]
struct EdgeRecord {
    source: usize,
    target: usize,
    port_restriction: Option<PortRestriction>,
}

#[derive(Serialize, Deserialize)]
struct GraphRecord {
    version: u32,
    enable_acyclicity_check: bool,
    vertices: Vec<VertexRecord>,
    edges: Vec<EdgeRecord>,
}

impl From<&Graph> for GraphRecord {
    fn from(graph: &Graph) -> Self {
        Self {
            version: GRAPH_FORMAT_VERSION,
            enable_acyclicity_check: graph.enable_acyclicity_check,
            vertices: graph
                .vertices
                .iter()
                .map(|d| VertexRecord {
                    version: d.vertex.format_version(),
                    execution_instance: d.execution_instance,
                    vertex: d.vertex.clone(),
                })
                .collect(),
            edges: graph
                .canonical_edges()
                .map(|e| EdgeRecord {
                    source: e.source.0 as usize,
                    target: e.target.0 as usize,
                    port_restriction: e.port_restriction,
                })
                .collect(),
        }
    }
}

impl TryFrom<GraphRecord> for Graph {
    type Error = GraphError;

    fn try_from(record: GraphRecord) -> Result<Self> {
        if record.version != GRAPH_FORMAT_VERSION {
            return Err(GraphError::UnsupportedVersion {
                kind: "Graph".to_owned(),
                version: record.version,
            });
        }
        let mut graph = Graph::new(record.enable_acyclicity_check);
        for (i, v) in record.vertices.into_iter().enumerate() {
            if v.version != v.vertex.format_version() {
                return Err(GraphError::UnsupportedVersion {
                    kind: v.vertex.name().to_owned(),
                    version: v.version,
                });
            }
            let id = VertexId(u32::try_from(i).unwrap_or(u32::MAX));
            graph.vertices.push(VertexData {
                vertex: v.vertex,
                execution_instance: v.execution_instance,
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
            graph
                .vertices_per_instance
                .entry(v.execution_instance)
                .or_default()
                .push(id);
        }

        let num_vertices = graph.vertices.len();
        for (edge, e) in record.edges.into_iter().enumerate() {
            for vertex in [e.source, e.target] {
                if vertex >= num_vertices {
                    return Err(GraphError::DanglingSerializedEdge {
                        edge,
                        vertex,
                        num_vertices,
                    });
                }
            }
            let input = Input {
                descriptor: VertexId(u32::try_from(e.source).unwrap_or(u32::MAX)),
                port_restriction: e.port_restriction,
            };
            graph.connect(input, VertexId(u32::try_from(e.target).unwrap_or(u32::MAX)));
        }
        graph.rebuild_execution_instance_graph();
        Ok(graph)
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        GraphRecord::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = GraphRecord::deserialize(deserializer)?;
        Graph::try_from(record).map_err(serde::de::Error::custom)
    }
}

impl Graph {
    /// Serializes to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&GraphRecord::from(self))?)
    }

    /// Deserializes from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Graph::try_from(serde_json::from_str::<GraphRecord>(json)?)
    }

    /// Writes pretty-printed JSON to `writer`.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        Ok(serde_json::to_writer_pretty(writer, &GraphRecord::from(self))?)
    }

    /// Reads JSON from `reader`.
    pub fn read_json<R: Read>(reader: R) -> Result<Self> {
        Graph::try_from(serde_json::from_reader::<_, GraphRecord>(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_type::ConnectionType;
    use crate::vertex::{DataInput, ExternalInput};

    fn sample() -> Graph {
        let mut g = Graph::new(false);
        let ext = g
            .add(
                ExternalInput::new(ConnectionType::DataInt8, 8).unwrap(),
                ExecutionInstanceId::step(0),
                [],
            )
            .unwrap();
        g.add(
            DataInput::new(ConnectionType::Int8, 4).unwrap(),
            ExecutionInstanceId::step(0),
            [Input::restricted(ext, PortRestriction::new(4, 7))],
        )
        .unwrap();
        g
    }

    #[test]
    fn json_roundtrip() {
        let g = sample();
        let back = Graph::from_json(&g.to_json().unwrap()).unwrap();
        assert_eq!(back, g);
        assert!(!back.enable_acyclicity_check());
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["vertices"][0]["version"] = 7.into();
        let err = Graph::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedVersion { version: 7, .. }));

        let mut value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["version"] = 1.into();
        assert!(Graph::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn dangling_edges_are_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        value["edges"][0]["source"] = 9.into();
        let err = Graph::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, GraphError::DanglingSerializedEdge { vertex: 9, .. }));
    }
}
