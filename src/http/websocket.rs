//! Server side of a watch stream.
//!
//! # Data Flow
//! ```text
//! ConfigStore subscription ──→ writer ──→ text frames ──→ client
//!                     ping ticker ──┘
//! client ──→ pongs / close ──→ reader (pong deadline)
//! ```
//!
//! # Design Decisions
//! - The socket is split; the writer owns the sink, so no lock is needed
//! - Either half ending cancels the connection token, which stops the other
//! - Every write is bounded by `write_wait`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::http::server::CdsServer;
use crate::net::Conn;
use crate::settings::KeepaliveSettings;
use crate::store::{ConfigStream, Topic};

/// What a client asked to watch.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub remote: SocketAddr,
    pub topic: Topic,
    pub node: Option<String>,
}

/// Run one watch connection until the peer leaves, stops answering pings,
/// or the server drops it.
pub async fn serve_watch(server: CdsServer, socket: WebSocket, request: WatchRequest) {
    let keepalive = server.keepalive();
    let (filter, patch) = match request.node.as_deref() {
        Some(node) => {
            let (filter, patch) = server.node_hooks(node);
            (Some(filter), patch)
        }
        None => (None, None),
    };

    let stream = server.store().subscribe(request.topic.clone(), filter, patch).await;
    let subscription = stream.id();

    let conn = Arc::new(Conn::new(
        request.remote,
        request.topic.to_string(),
        request.node.clone(),
        server.shutdown_token(),
    ));
    let _guard = server.conns().track(Arc::clone(&conn));
    tracing::info!(
        connection = %conn.id(),
        topic = %request.topic,
        node = ?request.node,
        "Watch started"
    );

    let cancel = conn.cancelled().clone();
    let (sink, source) = socket.split();
    tokio::join!(
        write_loop(sink, stream, cancel.clone(), keepalive),
        read_loop(source, cancel, keepalive.pong_wait()),
    );

    server.store().unsubscribe(subscription);
    tracing::info!(connection = %conn.id(), uptime = ?conn.uptime(), "Watch ended");
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut stream: ConfigStream,
    cancel: CancellationToken,
    keepalive: KeepaliveSettings,
) {
    let write_wait = keepalive.write_wait();
    let mut ticker = tokio::time::interval_at(Instant::now() + keepalive.ping_period(), keepalive.ping_period());

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            update = stream.recv() => match update {
                Some(update) => match serde_json::to_string(&update.config) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::warn!(id = %update.id(), error = %e, "Failed to encode config");
                        continue;
                    }
                },
                None => {
                    tracing::debug!("Subscription closed");
                    break;
                }
            },
            _ = ticker.tick() => Message::Ping(Default::default()),
        };

        if let Err(e) = send_bounded(&mut sink, message, write_wait).await {
            tracing::debug!(error = %e, "Write failed");
            break;
        }
    }

    cancel.cancel();
    let _ = send_bounded(&mut sink, Message::Close(None), write_wait).await;
}

async fn read_loop(mut source: SplitStream<WebSocket>, cancel: CancellationToken, pong_wait: Duration) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!("Pong timeout, dropping peer");
                break;
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Pong(_))) => deadline = Instant::now() + pong_wait,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Read failed");
                    break;
                }
            },
        }
    }

    cancel.cancel();
}

async fn send_bounded(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), String> {
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("write timed out".to_string()),
    }
}
