//! CLI command handlers.

pub mod config;
pub mod run;
pub mod validate;

use std::path::Path;

use anyhow::Result;
use gatekeep_config::{Config, load_config};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Load and validate `path`, printing field errors one per line on failure.
pub fn load_or_report(path: &Path) -> Result<Config> {
    match load_config(path) {
        Ok(config) => Ok(config),
        Err(e) if !e.field_errors().is_empty() => {
            for field in e.field_errors() {
                eprintln!("{}", field);
            }
            anyhow::bail!(
                "{}: {} invalid field(s)",
                path.display(),
                e.field_errors().len()
            )
        }
        Err(e) => Err(e.into()),
    }
}
