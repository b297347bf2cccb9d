//! Configuration display command.

use std::path::PathBuf;

use clap::Args;

use sigflow_config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write the configuration to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn run(args: ConfigArgs, config: &Config) -> anyhow::Result<()> {
    match &args.output {
        Some(path) => {
            config.save(path)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
