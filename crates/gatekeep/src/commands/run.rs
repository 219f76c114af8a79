//! Run command - serve the gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use gatekeep_server::GatewayOptions;

use super::{Context, load_or_report};
use crate::logging;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, default_value = "application.yaml", env = "GATEKEEP_CONFIG")]
    pub config: PathBuf,

    /// Listen address, overriding the config's port
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Seconds to wait for in-flight requests on shutdown
    #[arg(long, default_value_t = 60)]
    pub shutdown_grace: u64,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let config = load_or_report(&args.config)?;
    let _guard = logging::init(&config.logging, ctx.verbose)?;

    let mut options =
        GatewayOptions::new().with_shutdown_grace(Duration::from_secs(args.shutdown_grace));
    if let Some(bind) = args.bind {
        options = options.with_bind_address(bind);
    }

    tracing::info!(
        config = %args.config.display(),
        servers = config.servers.len(),
        "starting gateway"
    );
    gatekeep_server::run(&args.config, options).await?;
    Ok(())
}
