//! Dataflow scheduling over the execution instance graph.
//!
//! Every execution instance becomes a task. A task is queued once all of
//! its predecessors completed; a pool of scoped worker threads drains the
//! queue. Results are merged into one [`OutputData`] that later tasks read
//! their upstream values from.
//!
//! ```text
//!            ready ──► worker ─┐
//!   roots ──► queue ──► worker ─┼─► done ──► coordinator ─┬─► successors ready
//!            (crossbeam)        │                           └─► successors skipped on failure
//!                      worker ─┘
//! ```
//!
//! A failing task never aborts its siblings: independent branches run to
//! completion, the failing branch's descendants are skipped and the run
//! reports [`ExecutionError::NodesFailed`].

use std::collections::{BTreeMap, BTreeSet};

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error};

use sigflow_core::{DataSnippet, ExecutionInstanceGraph, ExecutionInstanceId, OutputData};

use crate::error::{ExecutionError, Result};

/// Runs the nodes of an execution instance graph in dependency order.
#[derive(Clone, Copy, Debug)]
pub struct Scheduler<'g> {
    graph: &'g ExecutionInstanceGraph,
    workers: usize,
}

impl<'g> Scheduler<'g> {
    /// Scheduler over `graph` with at most `workers` concurrent tasks.
    pub fn new(graph: &'g ExecutionInstanceGraph, workers: usize) -> Self {
        Self {
            graph,
            workers: workers.max(1),
        }
    }

    /// Runs `task` for every execution instance.
    ///
    /// `task` receives the per-column outputs merged so far, which include
    /// those of all its predecessors.
    pub fn run<F>(&self, task: F) -> Result<OutputData>
    where
        F: Fn(ExecutionInstanceId, &[DataSnippet]) -> Result<OutputData> + Sync,
    {
        let graph = self.graph;
        let mut in_degree: BTreeMap<ExecutionInstanceId, usize> =
            graph.nodes().map(|n| (n, graph.in_degree(n))).collect();
        let mut pending = in_degree.len();
        if pending == 0 {
            return Ok(OutputData::default());
        }

        let output = Mutex::new(OutputData::default());
        let (ready_tx, ready_rx) = unbounded::<ExecutionInstanceId>();
        let (done_tx, done_rx) = unbounded::<(ExecutionInstanceId, Result<()>)>();

        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        let mut first_error = None;

        std::thread::scope(|scope| {
            let task = &task;
            let output = &output;
            for _ in 0..self.workers.min(pending) {
                let ready_rx = ready_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for ei in &ready_rx {
                        let upstream = output.lock().snippets.clone();
                        let result = task(ei, &upstream)
                            .and_then(|produced| Ok(output.lock().merge(produced)?));
                        if done_tx.send((ei, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);
            drop(ready_rx);

            for (&ei, _) in in_degree.iter().filter(|(_, d)| **d == 0) {
                enqueue(&ready_tx, ei);
            }

            let mut blocked = BTreeSet::new();
            while pending > 0 {
                let Ok((ei, result)) = done_rx.recv() else {
                    break;
                };
                pending -= 1;
                let mut released = Vec::new();
                let mut dead = Vec::new();
                match result {
                    Ok(()) => {
                        debug!(%ei, "execution instance completed");
                        released.push(ei);
                    }
                    Err(err) => {
                        error!(%ei, error = %err, "execution instance failed");
                        failed.push(ei);
                        first_error.get_or_insert(err);
                        dead.push(ei);
                    }
                }

                while let Some(node) = released.pop().or_else(|| dead.pop()) {
                    let node_failed = failed.contains(&node) || blocked.contains(&node);
                    for successor in graph.successors(node) {
                        if node_failed {
                            blocked.insert(successor);
                        }
                        let Some(degree) = in_degree.get_mut(&successor) else {
                            continue;
                        };
                        *degree -= 1;
                        if *degree > 0 {
                            continue;
                        }
                        if blocked.contains(&successor) {
                            debug!(ei = %successor, "skipping execution instance");
                            skipped.push(successor);
                            pending -= 1;
                            dead.push(successor);
                        } else {
                            enqueue(&ready_tx, successor);
                        }
                    }
                }
            }
            drop(ready_tx);
        });

        if let Some(source) = first_error {
            failed.sort();
            skipped.sort();
            return Err(ExecutionError::NodesFailed {
                failed,
                skipped,
                source: Box::new(source),
            });
        }
        if pending > 0 {
            return Err(ExecutionError::Logic(format!(
                "{pending} execution instance(s) never became ready"
            )));
        }
        Ok(output.into_inner())
    }
}

/// Queues `ei` for the workers; `false` once every worker has exited.
fn enqueue(ready: &Sender<ExecutionInstanceId>, ei: ExecutionInstanceId) -> bool {
    if ready.send(ei).is_err() {
        debug!(%ei, "no worker left to run execution instance");
        return false;
    }
    debug!(%ei, "execution instance ready");
    true
}
