//! Reading `microweb.toml`.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Why a config file could not be turned into a [`ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Parse TOML text; every section is optional and falls back to its defaults.
pub fn parse_config(text: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(text)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config = parse_config(&fs::read_to_string(path)?)?;
    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}
