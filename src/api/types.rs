//! Identities, list bodies and the license status.

use serde::{Deserialize, Serialize};

use crate::api::stunner::{StunnerConfig, API_VERSION};

/// Render the `namespace/name` identity of a config.
pub fn config_id(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Split a `namespace/name` identity.
///
/// Returns `None` unless there are exactly two non-empty parts.
pub fn parse_id(id: &str) -> Option<(&str, &str)> {
    let (namespace, name) = id.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace, name))
}

/// A configuration document together with its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub namespace: String,
    pub name: String,
    pub config: StunnerConfig,
}

impl Config {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, config: StunnerConfig) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            config,
        }
    }

    /// The `namespace/name` identity.
    pub fn id(&self) -> String {
        config_id(&self.namespace, &self.name)
    }
}

/// Body of the list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigList {
    pub version: String,
    pub items: Vec<StunnerConfig>,
}

impl ConfigList {
    pub fn new(items: Vec<StunnerConfig>) -> Self {
        Self {
            version: API_VERSION.to_string(),
            items,
        }
    }
}

/// Licensing state reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    pub subscription_type: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for LicenseStatus {
    fn default() -> Self {
        Self {
            subscription_type: "free".to_string(),
            enabled_features: Vec::new(),
            valid_until: None,
            last_updated: None,
            last_error: None,
        }
    }
}
