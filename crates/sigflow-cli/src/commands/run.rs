//! Experiment execution command.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use sigflow_config::{Config, Experiment, ExperimentGraph, InstanceVertices};
use sigflow_core::{DataEntry, OutputData, VertexId};
use sigflow_exec::{Hooks, JitGraphExecutor};

use super::common::{format_us, write_json};

#[derive(Args)]
pub struct RunArgs {
    /// Experiment file (TOML)
    #[arg(value_name = "EXPERIMENT")]
    experiment: PathBuf,

    /// Write recorded data as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Recorded data of one execution instance.
#[derive(Debug, Serialize)]
pub struct InstanceReport {
    pub step: u32,
    pub connection: u32,
    pub chip: u32,
    pub realtime_duration_us: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spikes: Option<DataEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadc: Option<DataEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub madc: Option<DataEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rectified: Option<DataEntry>,
}

/// Everything `sigflow run` reports.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub setup: String,
    pub batch_size: usize,
    pub execution_duration_us: f64,
    pub hardware_duration_us: BTreeMap<String, f64>,
    pub instances: Vec<InstanceReport>,
}

fn micros(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e6
}

impl RunReport {
    fn new(setup: String, built: &ExperimentGraph, output: &OutputData) -> anyhow::Result<Self> {
        let time_info = &output.time_info;
        let fetch = |id: Option<VertexId>| {
            id.and_then(|id| output.snippets.first().and_then(|s| s.data.get(&id)).cloned())
        };
        let instances = built
            .instances
            .iter()
            .map(|vertices: &InstanceVertices| {
                let ei = vertices.execution_instance;
                InstanceReport {
                    step: ei.step,
                    connection: ei.chip.connection.0,
                    chip: ei.chip.chip.0,
                    realtime_duration_us: time_info
                        .realtime_duration_per_execution_instance
                        .get(&ei)
                        .copied()
                        .map_or(0.0, micros),
                    spikes: fetch(vertices.spikes),
                    cadc: fetch(vertices.cadc),
                    madc: fetch(vertices.madc),
                    rectified: fetch(vertices.rectified),
                }
            })
            .collect();
        Ok(Self {
            setup,
            batch_size: built.input.batch_size()?,
            execution_duration_us: micros(time_info.execution_duration),
            hardware_duration_us: time_info
                .execution_duration_per_hardware
                .iter()
                .map(|(chip, &d)| (chip.to_string(), micros(d)))
                .collect(),
            instances,
        })
    }
}

/// Events or samples held by `entry`, summed over batch entries.
fn count(entry: &DataEntry) -> usize {
    match entry {
        DataEntry::SpikesFromChip(b) => b.iter().map(Vec::len).sum(),
        DataEntry::MadcSamples(b) => b.iter().map(Vec::len).sum(),
        DataEntry::SpikesToChip(b) => b.iter().map(Vec::len).sum(),
        DataEntry::Int8(b) => b.iter().map(Vec::len).sum(),
        DataEntry::UInt5(b) => b.iter().map(Vec::len).sum(),
        DataEntry::UInt32(b) => b.iter().map(Vec::len).sum(),
    }
}

fn print_summary(report: &RunReport) {
    println!("Setup:       {}", report.setup);
    println!("Batch size:  {}", report.batch_size);
    println!("Wall time:   {}", format_us(report.execution_duration_us));
    for (chip, &us) in &report.hardware_duration_us {
        println!("  chip {chip}: {} busy", format_us(us));
    }
    println!();
    for instance in &report.instances {
        let mut parts = Vec::new();
        if let Some(spikes) = &instance.spikes {
            parts.push(format!("{} spikes", count(spikes)));
        }
        if let Some(cadc) = &instance.cadc {
            parts.push(format!("{} CADC samples", count(cadc)));
        }
        if let Some(madc) = &instance.madc {
            parts.push(format!("{} MADC samples", count(madc)));
        }
        if let Some(rectified) = &instance.rectified {
            parts.push(format!("{} rectified vectors", count(rectified)));
        }
        println!(
            "  step {} on {}/{}: {} ({} realtime)",
            instance.step,
            instance.connection,
            instance.chip,
            if parts.is_empty() { "no data".into() } else { parts.join(", ") },
            format_us(instance.realtime_duration_us),
        );
    }
}

pub fn run(args: RunArgs, config: &Config) -> anyhow::Result<()> {
    let experiment = Experiment::load(&args.experiment)?;
    let built = experiment.build()?;

    let (connections, _handles) = config.connect();
    let mut executor = JitGraphExecutor::new(connections);
    if config.executor.worker_threads > 0 {
        executor = executor.with_workers(config.executor.worker_threads);
    }
    if !executor.is_executable_on(&built.graph) {
        bail!(
            "experiment needs chips the configuration does not provide \
             ({} connections with {} chips each)",
            config.simulator.connections,
            config.simulator.chips_per_connection
        );
    }
    info!(
        instances = built.instances.len(),
        setup = %executor.unique_identifier(),
        "running experiment"
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("executing {}", args.experiment.display()));
    pb.enable_steady_tick(Duration::from_millis(100));
    let output = executor.run_graph(&built.graph, &built.configs, &built.input, &Hooks::new());
    pb.finish_and_clear();
    let output = output?;

    let report = RunReport::new(executor.unique_identifier(), &built, &output)?;
    executor.release_connections()?;

    print_summary(&report);
    if let Some(path) = &args.output {
        write_json(&report, path)?;
        println!("\nWrote {}", path.display());
    }
    Ok(())
}
