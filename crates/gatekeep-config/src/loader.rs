//! Reading and writing configuration documents.

use std::path::Path;

use regex::{Captures, Regex};

use crate::error::{ConfigError, Result};
use crate::types::Config;
use crate::validation::Validate;

/// Matches `${NAME}` and `$NAME`.
const ENV_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)";

/// Document format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Toml,
    Json,
}

impl Format {
    /// Format for `path`. Unknown or missing extensions are YAML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => Format::Toml,
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Replace `${VAR}` / `$VAR` with values from the process environment.
///
/// Unset variables expand to the empty string.
pub fn expand_env(raw: &str) -> Result<String> {
    let re = Regex::new(ENV_PATTERN).map_err(|e| ConfigError::Other(e.to_string()))?;
    Ok(re
        .replace_all(raw, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned())
}

/// Parse a document without validating it.
pub fn parse_config(raw: &str, format: Format) -> Result<Config> {
    let expanded = expand_env(raw)?;
    let config = match format {
        Format::Yaml => serde_yaml::from_str(&expanded)?,
        Format::Toml => toml::from_str(&expanded)?,
        Format::Json => serde_json::from_str(&expanded)?,
    };
    Ok(config)
}

/// Read, parse and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let config = parse_config(&raw, Format::from_path(path))?;
    config.validate().map_err(ConfigError::Invalid)?;
    tracing::debug!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded config"
    );
    Ok(config)
}

impl Config {
    /// Serialize in the given format. JSON is pretty-printed.
    pub fn to_string_as(&self, format: Format) -> Result<String> {
        match format {
            Format::Yaml => {
                serde_yaml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
            Format::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::Serialize(e.to_string())),
        }
    }

    /// Write to `path` in the format implied by its extension.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = self.to_string_as(Format::from_path(path))?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteFile {
            path: path.display().to_string(),
            source,
        })
    }
}
