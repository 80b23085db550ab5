//! The STUNner dataplane configuration document.
//!
//! The CDS treats this document as an opaque value: it compares, clones,
//! validates and serializes it, but never looks inside except to build or
//! recognize the deletion sentinel.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// The only document version this build understands.
pub const API_VERSION: &str = "v1";

const DEFAULT_LOG_LEVEL: &str = "all:INFO";
const DEFAULT_REALM: &str = "stunner.l7mp.io";

const LISTENER_PROTOCOLS: &[&str] = &[
    "TURN-UDP", "TURN-TCP", "TURN-TLS", "TURN-DTLS", "UDP", "TCP", "TLS", "DTLS",
];
const CLUSTER_TYPES: &[&str] = &["STATIC", "STRICT_DNS"];
const AUTH_TYPES: &[&str] = &["static", "ephemeral"];

/// Semantic errors found by [`StunnerConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported config version {0:?}, expected {API_VERSION:?}")]
    UnsupportedVersion(String),
    #[error("admin.name must not be empty")]
    MissingName,
    #[error("invalid auth type {0:?}")]
    InvalidAuthType(String),
    #[error("listener {listener:?}: invalid protocol {protocol:?}")]
    InvalidProtocol { listener: String, protocol: String },
    #[error("listener {0:?}: port must be non-zero")]
    InvalidPort(String),
    #[error("duplicate listener name {0:?}")]
    DuplicateListener(String),
    #[error("cluster {cluster:?}: invalid type {kind:?}")]
    InvalidClusterType { cluster: String, kind: String },
    #[error("duplicate cluster name {0:?}")]
    DuplicateCluster(String),
    #[error("listener {listener:?}: route to unknown cluster {cluster:?}")]
    UnknownCluster { listener: String, cluster: String },
}

/// Admin section: identity and operational knobs of the dataplane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AdminConfig {
    /// Gateway identity, conventionally `namespace/name`.
    pub name: String,
    #[serde(rename = "loglevel")]
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_endpoint: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            metrics_endpoint: None,
            health_check_endpoint: None,
        }
    }
}

/// TURN authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub realm: String,
    pub credentials: BTreeMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_type: "static".to_string(),
            realm: DEFAULT_REALM.to_string(),
            credentials: BTreeMap::new(),
        }
    }
}

/// A TURN listener exposed by the dataplane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub name: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
    #[serde(default = "default_listener_address")]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub routes: Vec<String>,
}

fn default_listener_address() -> String {
    "0.0.0.0".to_string()
}

/// An upstream cluster that listeners route to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_cluster_type")]
    pub cluster_type: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

fn default_cluster_type() -> String {
    "STATIC".to_string()
}

/// Dataplane configuration for one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StunnerConfig {
    #[serde(rename = "version")]
    pub api_version: String,
    pub admin: AdminConfig,
    pub auth: AuthConfig,
    pub listeners: Vec<ListenerConfig>,
    pub clusters: Vec<ClusterConfig>,
    /// Deletion marker, set only on sentinels built by [`zero_config`].
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl Default for StunnerConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            admin: AdminConfig::default(),
            auth: AuthConfig::default(),
            listeners: Vec::new(),
            clusters: Vec::new(),
            deleted: false,
        }
    }
}

impl StunnerConfig {
    /// Check the document for semantic errors.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api_version != API_VERSION {
            return Err(ValidationError::UnsupportedVersion(self.api_version.clone()));
        }
        if self.admin.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if !AUTH_TYPES.contains(&self.auth.auth_type.as_str()) {
            return Err(ValidationError::InvalidAuthType(self.auth.auth_type.clone()));
        }

        let mut clusters = HashSet::new();
        for cluster in &self.clusters {
            if !CLUSTER_TYPES.contains(&cluster.cluster_type.as_str()) {
                return Err(ValidationError::InvalidClusterType {
                    cluster: cluster.name.clone(),
                    kind: cluster.cluster_type.clone(),
                });
            }
            if !clusters.insert(cluster.name.as_str()) {
                return Err(ValidationError::DuplicateCluster(cluster.name.clone()));
            }
        }

        let mut listeners = HashSet::new();
        for listener in &self.listeners {
            if !LISTENER_PROTOCOLS.contains(&listener.protocol.to_uppercase().as_str()) {
                return Err(ValidationError::InvalidProtocol {
                    listener: listener.name.clone(),
                    protocol: listener.protocol.clone(),
                });
            }
            if listener.port == 0 {
                return Err(ValidationError::InvalidPort(listener.name.clone()));
            }
            if !listeners.insert(listener.name.as_str()) {
                return Err(ValidationError::DuplicateListener(listener.name.clone()));
            }
            if let Some(route) = listener.routes.iter().find(|r| !clusters.contains(r.as_str())) {
                return Err(ValidationError::UnknownCluster {
                    listener: listener.name.clone(),
                    cluster: route.clone(),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for StunnerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.deleted {
            return write!(f, "<deleted:{}>", self.admin.name);
        }
        write!(
            f,
            "admin:{{name={},loglevel={}}},auth:{{type={},realm={}}}",
            self.admin.name, self.admin.log_level, self.auth.auth_type, self.auth.realm
        )?;
        write!(f, ",listeners:[")?;
        for (i, l) in self.listeners.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}://{}:{}", l.name, l.protocol, l.address, l.port)?;
            if let Some(addr) = &l.public_address {
                write!(f, "(public={})", addr)?;
            }
        }
        write!(f, "],clusters:[")?;
        for (i, c) in self.clusters.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}:{}", c.name, c.cluster_type, c.endpoints.join("|"))?;
        }
        write!(f, "]")
    }
}

/// Build the deletion sentinel for the gateway `namespace/name`.
///
/// The sentinel keeps the identity in `admin.name`, carries no listeners or
/// clusters, and passes validation so clients can tell it apart from garbage.
pub fn zero_config(namespace: &str, name: &str) -> StunnerConfig {
    StunnerConfig {
        admin: AdminConfig {
            name: super::config_id(namespace, name),
            ..AdminConfig::default()
        },
        deleted: true,
        ..StunnerConfig::default()
    }
}

/// Whether `doc` signals a withdrawn configuration.
pub fn is_deleted(doc: &StunnerConfig) -> bool {
    doc.deleted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StunnerConfig {
        StunnerConfig {
            admin: AdminConfig {
                name: "ns1/gw1".into(),
                ..AdminConfig::default()
            },
            listeners: vec![ListenerConfig {
                name: "udp".into(),
                protocol: "TURN-UDP".into(),
                public_address: None,
                public_port: None,
                address: "0.0.0.0".into(),
                port: 3478,
                routes: vec!["media".into()],
            }],
            clusters: vec![ClusterConfig {
                name: "media".into(),
                cluster_type: "STATIC".into(),
                endpoints: vec!["10.0.0.0/8".into()],
            }],
            ..StunnerConfig::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn zero_config_is_valid_and_deleted() {
        let zero = zero_config("ns1", "gw1");
        assert_eq!(zero.validate(), Ok(()));
        assert!(is_deleted(&zero));
        assert_eq!(zero.admin.name, "ns1/gw1");
        assert!(zero.listeners.is_empty());
    }

    #[test]
    fn empty_real_config_is_not_deleted() {
        let mut cfg = StunnerConfig::default();
        cfg.admin.name = "ns1/gw1".into();
        assert!(!is_deleted(&cfg));

        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("deleted"));
        let back: StunnerConfig = serde_json::from_str(&json).unwrap();
        assert!(!is_deleted(&back));
    }

    #[test]
    fn deleted_marker_survives_the_wire() {
        let json = serde_json::to_string(&zero_config("ns1", "gw1")).unwrap();
        assert!(json.contains("\"deleted\":true"));
        let back: StunnerConfig = serde_json::from_str(&json).unwrap();
        assert!(is_deleted(&back));
    }

    #[test]
    fn validation_failures() {
        let mut cfg = sample();
        cfg.api_version = "v0".into();
        assert!(matches!(cfg.validate(), Err(ValidationError::UnsupportedVersion(_))));

        let mut cfg = sample();
        cfg.admin.name.clear();
        assert_eq!(cfg.validate(), Err(ValidationError::MissingName));

        let mut cfg = sample();
        cfg.listeners[0].protocol = "SCTP".into();
        assert!(matches!(cfg.validate(), Err(ValidationError::InvalidProtocol { .. })));

        let mut cfg = sample();
        cfg.listeners[0].routes = vec!["nope".into()];
        assert!(matches!(cfg.validate(), Err(ValidationError::UnknownCluster { .. })));

        let mut cfg = sample();
        let dup = cfg.clusters[0].clone();
        cfg.clusters.push(dup);
        assert!(matches!(cfg.validate(), Err(ValidationError::DuplicateCluster(_))));
    }

    #[test]
    fn display_is_compact() {
        let s = sample().to_string();
        assert!(s.contains("name=ns1/gw1"));
        assert!(s.contains("udp:TURN-UDP://0.0.0.0:3478"));
        assert_eq!(zero_config("a", "b").to_string(), "<deleted:a/b>");
    }
}
