//! Configuration system for the gatekeep OIDC gateway.
//!
//! Provides file-based configuration with:
//! - YAML, TOML or JSON documents, picked by file extension (YAML when unknown)
//! - `${VAR}` / `$VAR` environment expansion on the raw document
//! - Per-virtual-host settings: OIDC client, session backend, proxied locations
//! - Statically typed validation returning every field error at once
//!
//! The gateway only ever consumes a [`Config`] that passed [`Config::validate`].

pub mod error;
pub mod example;
pub mod loader;
pub mod types;
pub mod validation;

pub use error::{ConfigError, Result};
pub use loader::{Format, expand_env, load_config, parse_config};
pub use types::*;
pub use validation::{FieldError, Validate};
