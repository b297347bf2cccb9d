//! Graph export command.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;

use sigflow_config::Experiment;

use super::common::create;

#[derive(Args)]
pub struct GraphArgs {
    /// Experiment file (TOML)
    #[arg(value_name = "EXPERIMENT")]
    experiment: PathBuf,

    /// Output graph file (JSON)
    #[arg(short, long, value_name = "OUTPUT")]
    output: PathBuf,
}

pub fn run(args: GraphArgs) -> anyhow::Result<()> {
    let built = Experiment::load(&args.experiment)?.build()?;

    let mut writer = create(&args.output)?;
    built.graph.write_json(&mut writer)?;
    writer.flush()?;

    println!(
        "Wrote {} vertices in {} execution instances to {}",
        built.graph.num_vertices(),
        built.graph.execution_instances().len(),
        args.output.display()
    );
    Ok(())
}
