//! Settings validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Keepalive ordering (ping period below pong wait)
//! - Address and URL well-formedness
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: CdsSettings → Result<(), Vec<SettingsError>>

use std::net::SocketAddr;

use crate::settings::schema::{CdsSettings, KeepaliveSettings};

/// A single semantic problem with the settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("keepalive.{0} must be greater than zero")]
    ZeroPeriod(&'static str),
    #[error("keepalive.ping_period_ms ({ping_ms}) must be less than keepalive.pong_wait_ms ({pong_ms})")]
    PingNotBelowPongWait { ping_ms: u64, pong_ms: u64 },
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
    #[error("invalid metrics address {0:?}")]
    InvalidMetricsAddress(String),
    #[error("invalid server url {0:?}")]
    InvalidServerUrl(String),
}

/// Check keepalive timing on its own; the client runs this at construction.
pub fn validate_keepalive(keepalive: &KeepaliveSettings) -> Result<(), Vec<SettingsError>> {
    let mut errors = Vec::new();
    check_keepalive(keepalive, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the whole settings tree.
pub fn validate_settings(settings: &CdsSettings) -> Result<(), Vec<SettingsError>> {
    let mut errors = Vec::new();

    check_keepalive(&settings.keepalive, &mut errors);

    if settings.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(SettingsError::InvalidBindAddress(settings.server.bind_address.clone()));
    }

    if settings.observability.metrics_enabled
        && settings.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(SettingsError::InvalidMetricsAddress(
            settings.observability.metrics_address.clone(),
        ));
    }

    match url::Url::parse(&settings.client.server_url) {
        Ok(u) if matches!(u.scheme(), "http" | "https" | "ws" | "wss") => {}
        _ => errors.push(SettingsError::InvalidServerUrl(settings.client.server_url.clone())),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_keepalive(k: &KeepaliveSettings, errors: &mut Vec<SettingsError>) {
    for (field, value) in [
        ("ping_period_ms", k.ping_period_ms),
        ("pong_wait_ms", k.pong_wait_ms),
        ("write_wait_ms", k.write_wait_ms),
        ("retry_period_ms", k.retry_period_ms),
    ] {
        if value == 0 {
            errors.push(SettingsError::ZeroPeriod(field));
        }
    }
    if k.ping_period_ms >= k.pong_wait_ms {
        errors.push(SettingsError::PingNotBelowPongWait {
            ping_ms: k.ping_period_ms,
            pong_ms: k.pong_wait_ms,
        });
    }
}
