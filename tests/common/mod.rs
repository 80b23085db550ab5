//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use stunner_cds::api::{Config, ListenerConfig, StunnerConfig};
use stunner_cds::settings::{KeepaliveSettings, ServerSettings};
use stunner_cds::CdsServer;
use tokio::sync::mpsc;

/// Keepalive timing short enough for tests to observe dead peers quickly.
pub fn fast_keepalive() -> KeepaliveSettings {
    KeepaliveSettings {
        ping_period_ms: 100,
        pong_wait_ms: 300,
        write_wait_ms: 200,
        retry_period_ms: 50,
    }
}

/// Start a server on an ephemeral loopback port.
pub async fn start_server(mut settings: ServerSettings) -> (CdsServer, SocketAddr) {
    settings.bind_address = "127.0.0.1:0".to_string();
    let server = CdsServer::new(settings, fast_keepalive());
    let addr = server.start().await.unwrap();
    (server, addr)
}

/// A valid single-listener gateway document.
pub fn gateway(namespace: &str, name: &str, port: u16) -> Config {
    let mut config = StunnerConfig::default();
    config.admin.name = format!("{}/{}", namespace, name);
    config.listeners.push(ListenerConfig {
        name: "udp-listener".into(),
        protocol: "TURN-UDP".into(),
        public_address: None,
        public_port: None,
        address: "0.0.0.0".into(),
        port,
        routes: vec![],
    });
    Config::new(namespace, name, config)
}

/// Receive the next update or panic after a generous timeout.
pub async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no update within timeout")
        .expect("channel closed")
}

/// Assert that nothing arrives for `wait`.
pub async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::Receiver<T>, wait: Duration) {
    if let Ok(Some(update)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("unexpected update: {:?}", update);
    }
}

/// Wait until `check` holds, polling every 10ms for up to 5s.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within timeout");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
