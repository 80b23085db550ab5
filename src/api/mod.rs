//! Wire-level data model shared by the server and the client.
//!
//! # Types
//! - `StunnerConfig`: the dataplane configuration document pushed to gateways
//! - `Config`: a document together with its `namespace/name` identity
//! - `ConfigList`: response body of the list endpoints
//! - `LicenseStatus`: response body of the license endpoint
//!
//! # Design Decisions
//! - Documents are plain values: equality is structural, copies are `Clone`
//! - Withdrawn configurations travel as an explicit sentinel document that
//!   carries a `deleted` marker, never inferred from emptiness

pub mod stunner;
pub mod types;

pub use stunner::{
    is_deleted, zero_config, AdminConfig, AuthConfig, ClusterConfig, ListenerConfig,
    StunnerConfig, ValidationError, API_VERSION,
};
pub use types::{config_id, parse_id, Config, ConfigList, LicenseStatus};
