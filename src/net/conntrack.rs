//! Live watch connection tracking.
//!
//! # Responsibilities
//! - Identify each websocket by its remote address
//! - Snapshot live connections for diagnostics
//! - Forcibly close a specific connection

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// One live server-side watch connection.
#[derive(Debug)]
pub struct Conn {
    id: String,
    remote_addr: SocketAddr,
    topic: String,
    node: Option<String>,
    connected_at: Instant,
    cancel: CancellationToken,
}

impl Conn {
    /// Create a connection whose lifetime is bounded by `parent`.
    pub fn new(remote_addr: SocketAddr, topic: String, node: Option<String>, parent: &CancellationToken) -> Self {
        Self {
            id: remote_addr.to_string(),
            remote_addr,
            topic,
            node,
            connected_at: Instant::now(),
            cancel: parent.child_token(),
        }
    }

    /// Stable identifier, derived from the remote address.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the connection's tasks to shut down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when this connection must go away.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Registry of live watch connections.
#[derive(Debug, Clone, Default)]
pub struct ConnTrack {
    conns: Arc<DashMap<String, Arc<Conn>>>,
}

impl ConnTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any stale entry with the same id.
    pub fn upsert(&self, conn: Arc<Conn>) {
        self.conns.insert(conn.id().to_string(), conn);
        metrics::record_connection_count(self.conns.len());
    }

    /// Unregister a connection without closing it.
    pub fn delete(&self, id: &str) -> Option<Arc<Conn>> {
        let removed = self.conns.remove(id).map(|(_, conn)| conn);
        metrics::record_connection_count(self.conns.len());
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Conn>> {
        self.conns.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Copy of the live connection list.
    pub fn snapshot(&self) -> Vec<Arc<Conn>> {
        self.conns.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Register `conn` for as long as the returned guard lives.
    pub fn track(&self, conn: Arc<Conn>) -> ConnGuard {
        self.upsert(Arc::clone(&conn));
        tracing::debug!(connection = %conn.id(), topic = %conn.topic(), "Connection tracked");
        ConnGuard {
            track: self.clone(),
            conn,
        }
    }
}

/// Guard that unregisters a connection when dropped.
#[derive(Debug)]
pub struct ConnGuard {
    track: ConnTrack,
    conn: Arc<Conn>,
}

impl ConnGuard {
    pub fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        // Only remove our own entry; a reconnect may reuse the id.
        self.track
            .conns
            .remove_if(self.conn.id(), |_, c| Arc::ptr_eq(c, &self.conn));
        metrics::record_connection_count(self.track.conns.len());
        tracing::trace!(connection = %self.conn.id(), "Connection untracked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(port: u16, parent: &CancellationToken) -> Arc<Conn> {
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        Arc::new(Conn::new(addr, "all".into(), None, parent))
    }

    #[test]
    fn id_is_remote_address() {
        let parent = CancellationToken::new();
        let c = conn(4000, &parent);
        assert_eq!(c.id(), "127.0.0.1:4000");
    }

    #[test]
    fn track_and_untrack() {
        let parent = CancellationToken::new();
        let track = ConnTrack::new();
        assert!(track.is_empty());

        let g1 = track.track(conn(4001, &parent));
        let g2 = track.track(conn(4002, &parent));
        assert_eq!(track.len(), 2);
        assert!(track.get("127.0.0.1:4001").is_some());

        drop(g1);
        assert_eq!(track.len(), 1);
        assert!(track.get("127.0.0.1:4001").is_none());

        drop(g2);
        assert!(track.snapshot().is_empty());
    }

    #[test]
    fn stale_guard_does_not_remove_replacement() {
        let parent = CancellationToken::new();
        let track = ConnTrack::new();
        let old = track.track(conn(4003, &parent));
        let new = conn(4003, &parent);
        track.upsert(Arc::clone(&new));

        drop(old);
        let current = track.get("127.0.0.1:4003").unwrap();
        assert!(Arc::ptr_eq(&current, &new));
    }

    #[test]
    fn close_cancels_only_that_connection() {
        let parent = CancellationToken::new();
        let a = conn(4004, &parent);
        let b = conn(4005, &parent);

        a.close();
        assert!(a.is_closed());
        assert!(!b.is_closed());

        parent.cancel();
        assert!(b.is_closed());
    }
}
