//! Serialized graph summary.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use sigflow_core::Graph;

/// Summarise a graph file.
#[derive(Args)]
pub struct InspectArgs {
    /// Graph file (JSON) as written by `sigflow graph`
    pub file: PathBuf,

    /// List every vertex with its inputs
    #[arg(short, long)]
    pub verbose: bool,
}

/// Run the inspect command.
pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    let file = File::open(&args.file)
        .with_context(|| format!("failed to open '{}'", args.file.display()))?;
    let graph = Graph::read_json(BufReader::new(file))?;

    println!("File:                {}", args.file.display());
    println!("Vertices:            {}", graph.num_vertices());
    println!("Edges:               {}", graph.num_edges());
    println!(
        "Acyclicity check:    {}",
        if graph.enable_acyclicity_check() { "enabled" } else { "disabled" }
    );
    println!(
        "Instance graph:      {}",
        if graph.is_acyclic_execution_instance_graph() { "acyclic" } else { "cyclic" }
    );

    let instances = graph.execution_instance_graph();
    println!("Execution instances: {}", instances.len());
    for ei in graph.execution_instances() {
        let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
        for &vertex in graph.vertices_of(ei) {
            *kinds.entry(graph.vertex_property(vertex)?.name()).or_default() += 1;
        }
        let after: Vec<String> = instances.predecessors(ei).map(|p| p.to_string()).collect();
        println!();
        println!("  {ei}");
        if !after.is_empty() {
            println!("    after:    {}", after.join(", "));
        }
        for (kind, n) in &kinds {
            println!("    {n:>3} x {kind}");
        }
        if args.verbose {
            for vertex in graph.local_topological_order(ei) {
                let inputs: Vec<String> = graph
                    .in_edges(vertex)?
                    .iter()
                    .map(|edge| match edge.port_restriction {
                        Some(r) => format!("{}[{}..={}]", edge.source, r.min, r.max),
                        None => edge.source.to_string(),
                    })
                    .collect();
                println!(
                    "    {vertex} {} <- [{}]",
                    graph.vertex_property(vertex)?.name(),
                    inputs.join(", ")
                );
            }
        }
    }
    Ok(())
}
