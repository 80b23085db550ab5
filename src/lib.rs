//! STUNner Configuration Discovery Service
//!
//! Keeps the desired dataplane configuration of every gateway and streams
//! changes to watchers over websockets.

pub mod api;
pub mod client;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod settings;
pub mod store;

pub use api::{Config, StunnerConfig};
pub use client::{AllConfigsApi, ClientError, ConfigNamespaceNameApi, ConfigsNamespaceApi};
pub use http::CdsServer;
pub use lifecycle::Shutdown;
pub use settings::CdsSettings;
pub use store::ConfigStore;
