//! Config command - write an example configuration.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use gatekeep_config::Config;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output file; the extension picks YAML, TOML or JSON
    #[arg(short, long, default_value = "application.yml")]
    pub output: PathBuf,
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    Config::example()
        .write_to(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    if ctx.verbose {
        eprintln!("Wrote example configuration to {}", args.output.display());
    }
    Ok(())
}
