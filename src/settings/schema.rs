//! Settings schema definitions.
//!
//! This module defines the complete settings structure for the CDS daemon and
//! the client-side keepalive knobs. All types derive Serde traits for
//! deserialization from TOML files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings for the CDS daemon and CLI.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CdsSettings {
    /// Server behaviour (bind address, deletion policy).
    pub server: ServerSettings,

    /// Keepalive and retry timing, shared by server and client.
    pub keepalive: KeepaliveSettings,

    /// Client defaults used by the CLI.
    pub client: ClientSettings,

    /// Observability settings.
    pub observability: ObservabilitySettings,
}

/// Server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address (e.g., "0.0.0.0:13478").
    pub bind_address: String,

    /// Remove configs silently instead of pushing the deletion sentinel.
    pub suppress_deletion: bool,

    /// Debounce before a deletion takes effect, in milliseconds (0 = immediate).
    pub deletion_update_delay_ms: u64,

    /// Timeout for plain (non-watch) requests in seconds.
    pub request_timeout_secs: u64,

    /// JSON file holding the desired state; watched for changes when set.
    pub desired_state_path: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:13478".to_string(),
            suppress_deletion: false,
            deletion_update_delay_ms: 0,
            request_timeout_secs: 10,
            desired_state_path: None,
        }
    }
}

impl ServerSettings {
    pub fn deletion_update_delay(&self) -> Duration {
        Duration::from_millis(self.deletion_update_delay_ms)
    }
}

/// Websocket keepalive and reconnect timing.
///
/// `ping_period_ms` must stay below `pong_wait_ms`, otherwise a healthy peer
/// is declared dead before the next ping can revive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepaliveSettings {
    /// Interval between pings in milliseconds.
    pub ping_period_ms: u64,

    /// How long to wait for a pong before declaring the peer dead.
    pub pong_wait_ms: u64,

    /// Deadline for a single control or data frame write.
    pub write_wait_ms: u64,

    /// Delay before reconnecting after a failed or lost connection.
    pub retry_period_ms: u64,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            ping_period_ms: 5_000,
            pong_wait_ms: 8_000,
            write_wait_ms: 2_000,
            retry_period_ms: 1_000,
        }
    }
}

impl KeepaliveSettings {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }
}

/// Client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Base URL of the CDS server.
    pub server_url: String,

    /// Drop deletion sentinels instead of forwarding them.
    pub suppress_delete: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:13478".to_string(),
            suppress_delete: false,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
