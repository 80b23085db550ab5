//! Loading settings and desired state from disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::api::{Config, ValidationError};
use crate::settings::schema::CdsSettings;
use crate::settings::validation::{validate_settings, SettingsError};

/// Error type for loading settings or desired state.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<SettingsError>),
    #[error("Invalid config {id}: {source}")]
    InvalidConfig { id: String, source: ValidationError },
}

fn join(errors: &[SettingsError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The complete desired state handed to the server in one go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    /// Every config that should exist.
    pub configs: Vec<Config>,

    /// External address of each node, used to patch per-node watches.
    pub nodes: BTreeMap<String, String>,
}

/// Load and validate settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<CdsSettings, LoadError> {
    let content = fs::read_to_string(path)?;
    let settings: CdsSettings = toml::from_str(&content)?;

    validate_settings(&settings).map_err(LoadError::Validation)?;

    Ok(settings)
}

/// Load the desired state from a JSON file, rejecting it if any document is invalid.
pub fn load_desired_state(path: &Path) -> Result<DesiredState, LoadError> {
    let content = fs::read_to_string(path)?;
    let state: DesiredState = serde_json::from_str(&content)?;

    for config in &state.configs {
        config.config.validate().map_err(|source| LoadError::InvalidConfig {
            id: config.id(),
            source,
        })?;
    }

    Ok(state)
}
