//! Validate command - check a configuration file.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use gatekeep_config::{DEFAULT_PORT, DEFAULT_TLS_PORT};

use super::{Context, load_or_report};

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, default_value = "application.yaml", env = "GATEKEEP_CONFIG")]
    pub config: PathBuf,
}

/// Run the validate command.
pub fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let config = load_or_report(&args.config)?;
    println!("{}: ok", args.config.display());
    if ctx.verbose {
        let default_port = if config.tls_paths().is_some() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        };
        for server in &config.servers {
            println!(
                "  {} ({} location(s), {} session backend)",
                server.host_key(default_port),
                server.locations.len(),
                if server.session.plugin { "plugin" } else { "memory" }
            );
        }
    }
    Ok(())
}
