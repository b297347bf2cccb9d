//! Just-in-time graph executor.
//!
//! Owns the hardware connections and turns each `run` into a fresh set of
//! execution instance nodes. Nothing is cached between runs apart from the
//! differential configuration state each [`StatefulConnection`] tracks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use tracing::{debug, info};

use sigflow_backend::{Connection, ConnectionTimeInfo, StatefulConnection};
use sigflow_core::{
    DataSnippet, ExecutionInstanceHooks, ExecutionInstanceId, Graph, InputData, OutputData,
};
use sigflow_hw::{Chip, ConnectionOnExecutor};

use crate::error::{ExecutionError, Result};
use crate::node::ExecutionInstanceNode;
use crate::scheduler::Scheduler;

/// Chip configuration per execution instance.
pub type ChipConfigs = BTreeMap<ExecutionInstanceId, Chip>;

/// Hooks per execution instance.
pub type Hooks = BTreeMap<ExecutionInstanceId, ExecutionInstanceHooks>;

/// Executes graphs on a set of connections.
#[derive(Debug)]
pub struct JitGraphExecutor {
    connections: BTreeMap<ConnectionOnExecutor, StatefulConnection>,
    workers: usize,
}

impl JitGraphExecutor {
    /// Executor over `connections`.
    pub fn new(connections: BTreeMap<ConnectionOnExecutor, StatefulConnection>) -> Self {
        let workers = std::thread::available_parallelism().map_or(1, usize::from);
        Self {
            connections,
            workers,
        }
    }

    /// Limits the number of execution instances processed concurrently.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Connections the executor holds.
    pub fn contained_connections(&self) -> BTreeSet<ConnectionOnExecutor> {
        self.connections.keys().copied().collect()
    }

    /// Connection `connection`, if held.
    pub fn connection(&self, connection: ConnectionOnExecutor) -> Option<&StatefulConnection> {
        self.connections.get(&connection)
    }

    /// Releases all connections; the executor is empty afterwards.
    pub fn release_connections(
        &mut self,
    ) -> Result<BTreeMap<ConnectionOnExecutor, Box<dyn Connection>>> {
        let connections = std::mem::take(&mut self.connections);
        connections
            .into_iter()
            .map(|(id, connection)| Ok((id, connection.release()?)))
            .collect()
    }

    /// Accumulated backend timing per connection.
    pub fn time_info(&self) -> BTreeMap<ConnectionOnExecutor, ConnectionTimeInfo> {
        self.connections
            .iter()
            .map(|(&id, c)| (id, c.time_info()))
            .collect()
    }

    /// Identifier of the hardware setup behind all connections.
    pub fn unique_identifier(&self) -> String {
        self.connections
            .values()
            .map(StatefulConnection::unique_identifier)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Bitfile description per connection.
    pub fn bitfile_info(&self) -> BTreeMap<ConnectionOnExecutor, String> {
        self.connections
            .iter()
            .map(|(&id, c)| (id, c.bitfile_info().to_owned()))
            .collect()
    }

    /// Remote service version per connection.
    pub fn remote_repo_state(&self) -> BTreeMap<ConnectionOnExecutor, String> {
        self.connections
            .iter()
            .map(|(&id, c)| (id, c.remote_repo_state().to_owned()))
            .collect()
    }

    /// Whether every execution instance of `graph` is placed on a chip the
    /// executor can reach.
    pub fn is_executable_on(&self, graph: &Graph) -> bool {
        graph.execution_instances().into_iter().all(|ei| {
            self.connections
                .get(&ei.chip.connection)
                .is_some_and(|c| c.chips_on_connection().contains(&ei.chip.chip))
        })
    }

    /// Runs a single graph.
    pub fn run_graph(
        &self,
        graph: &Graph,
        configs: &ChipConfigs,
        input: &InputData,
        hooks: &Hooks,
    ) -> Result<OutputData> {
        self.run(std::slice::from_ref(graph), std::slice::from_ref(configs), input, hooks)
    }

    /// Runs `graphs` as consecutive realtime columns.
    ///
    /// All graphs share one execution instance graph. `configs` holds one
    /// map per graph or a single map used for every graph; `input` holds one
    /// snippet per graph or none.
    pub fn run(
        &self,
        graphs: &[Graph],
        configs: &[ChipConfigs],
        input: &InputData,
        hooks: &Hooks,
    ) -> Result<OutputData> {
        let timer = Instant::now();
        self.validate(graphs, configs, input, hooks)?;
        let Some(first) = graphs.first() else {
            return Ok(OutputData::default());
        };

        let instances = first.execution_instance_graph();
        info!(
            columns = graphs.len(),
            execution_instances = instances.len(),
            batch_size = input.batch_size()?,
            "starting execution"
        );
        let scheduler = Scheduler::new(instances, self.workers);
        let mut output = scheduler.run(|ei, upstream: &[DataSnippet]| {
            let connection = self.connections.get(&ei.chip.connection).ok_or_else(|| {
                ExecutionError::Logic(format!("{ei} placed on an unknown connection"))
            })?;
            let configs = (0..graphs.len())
                .map(|column| {
                    configs
                        .get(column)
                        .unwrap_or(&configs[0])
                        .get(&ei)
                        .ok_or_else(|| ExecutionError::Logic(format!("{ei} lacks a configuration")))
                })
                .collect::<Result<Vec<_>>>()?;
            ExecutionInstanceNode::new(ei, graphs, configs, input, hooks.get(&ei), connection)
                .run(upstream)
        })?;
        output.time_info.execution_duration = timer.elapsed();
        info!(elapsed = ?output.time_info.execution_duration, "execution finished");
        Ok(output)
    }

    fn validate(
        &self,
        graphs: &[Graph],
        configs: &[ChipConfigs],
        input: &InputData,
        hooks: &Hooks,
    ) -> Result<()> {
        let Some(first) = graphs.first() else {
            return Ok(());
        };
        if configs.len() != 1 && configs.len() != graphs.len() {
            return Err(ExecutionError::validation(format!(
                "{} configuration maps for {} graphs",
                configs.len(),
                graphs.len()
            )));
        }
        if !input.snippets.is_empty() && input.snippets.len() != graphs.len() {
            return Err(ExecutionError::validation(format!(
                "{} input snippets for {} graphs",
                input.snippets.len(),
                graphs.len()
            )));
        }
        input.batch_size()?;
        if graphs
            .iter()
            .any(|g| g.execution_instance_graph() != first.execution_instance_graph())
        {
            return Err(ExecutionError::validation(
                "graphs of consecutive realtime columns differ in their execution instance graph",
            ));
        }
        if graphs.len() > 1 && hooks.values().any(|h| !h.is_empty()) {
            return Err(ExecutionError::validation(
                "hooks are not supported for several realtime columns",
            ));
        }

        for ei in first.execution_instance_graph().nodes() {
            let connection = self.connections.get(&ei.chip.connection).ok_or_else(|| {
                ExecutionError::validation(format!(
                    "{ei} placed on connection {:?} the executor does not hold",
                    ei.chip.connection
                ))
            })?;
            if !connection.chips_on_connection().contains(&ei.chip.chip) {
                return Err(ExecutionError::validation(format!(
                    "{ei} placed on chip {:?} its connection does not have",
                    ei.chip.chip
                )));
            }
            if configs.iter().any(|c| !c.contains_key(&ei)) {
                return Err(ExecutionError::validation(format!(
                    "no chip configuration for {ei}"
                )));
            }
        }
        for (column, graph) in graphs.iter().enumerate() {
            for id in graph.vertex_ids() {
                let vertex = graph.vertex_property(id)?;
                let connected = graph.in_edges(id)?.len();
                let required = vertex.inputs().len();
                if !vertex.variadic_input() && connected < required {
                    return Err(ExecutionError::validation(format!(
                        "{} {id} in column {column} has {connected} of {required} inputs connected",
                        vertex.name()
                    )));
                }
            }
        }
        debug!(graphs = graphs.len(), "execution request valid");
        Ok(())
    }
}
