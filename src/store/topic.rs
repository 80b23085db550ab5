//! Subscription topics and matching.
//!
//! # Matching Rules
//! - `all` matches every config
//! - `<namespace>/*` matches configs in that namespace
//! - anything else matches the exact `namespace/name` identity

use std::fmt;

use crate::api::{config_id, Config};

const TOPIC_ALL: &str = "all";
const NAMESPACE_SUFFIX: &str = "/*";

/// What a subscription is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Namespace(String),
    Config(String),
}

impl Topic {
    pub fn namespace(namespace: &str) -> Self {
        Topic::Namespace(namespace.to_string())
    }

    pub fn config(namespace: &str, name: &str) -> Self {
        Topic::Config(config_id(namespace, name))
    }

    /// Parse the textual form (`all`, `ns/*`, `ns/name`).
    pub fn parse(topic: &str) -> Self {
        if topic == TOPIC_ALL {
            Topic::All
        } else if let Some(namespace) = topic.strip_suffix(NAMESPACE_SUFFIX) {
            Topic::Namespace(namespace.to_string())
        } else {
            Topic::Config(topic.to_string())
        }
    }

    pub fn matches(&self, config: &Config) -> bool {
        self.matches_id(&config.namespace, &config.name)
    }

    pub fn matches_id(&self, namespace: &str, name: &str) -> bool {
        match self {
            Topic::All => true,
            Topic::Namespace(ns) => ns == namespace,
            Topic::Config(id) => id.split_once('/') == Some((namespace, name)),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::All => write!(f, "{}", TOPIC_ALL),
            Topic::Namespace(ns) => write!(f, "{}{}", ns, NAMESPACE_SUFFIX),
            Topic::Config(id) => write!(f, "{}", id),
        }
    }
}
