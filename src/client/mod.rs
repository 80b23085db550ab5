//! Client library for the CDS API.
//!
//! # Data Flow
//! ```text
//! base address
//!     → api.rs (endpoint per view: all, namespace, single config)
//!     → get(): one REST snapshot
//!     → watch(): watcher.rs connect/stream/reconnect loop
//!     → mpsc::Sender<StunnerConfig> owned by the caller
//! ```
//!
//! # Design Decisions
//! - Transport errors never escape `watch`; it reconnects until cancelled
//! - Bad frames are dropped, the connection stays up
//! - Keepalive runs on the client too, so a silent server is detected

pub mod api;
pub mod watcher;

pub use api::{AllConfigsApi, ConfigClient, ConfigNamespaceNameApi, ConfigsNamespaceApi, LicenseApi};

use crate::settings::SettingsError;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid server address {0:?}: {1}")]
    InvalidAddress(String, url::ParseError),
    #[error("unsupported url scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("invalid keepalive settings: {}", join(.0))]
    Keepalive(Vec<SettingsError>),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid origin header: {0}")]
    Origin(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
    #[error("websocket handshake did not finish within {0:?}")]
    DialTimeout(std::time::Duration),
    #[error("no pong within {0:?}")]
    PongTimeout(std::time::Duration),
    #[error("write timed out")]
    WriteTimeout,
    #[error("connection closed by server")]
    Closed,
    #[error("receiver dropped")]
    ReceiverClosed,
}

fn join(errors: &[SettingsError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
