//! Watch loop: connect, stream, detect dead peers, reconnect.
//!
//! # States
//! ```text
//! Disconnected → Connecting → Streaming → Disconnected
//!      ↑             │ dial error/timeout    │ read/write error, pong timeout, close
//!      └── retry_period ─────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::api::{is_deleted, StunnerConfig};
use crate::client::api::ConfigClient;
use crate::client::ClientError;
use crate::observability::metrics;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<Mutex<SplitSink<Socket, Message>>>;

impl ConfigClient {
    /// Stream configs into `tx` until `cancel` fires, reconnecting after
    /// every failure.
    ///
    /// Returns `Ok(())` on cancellation or once the receiver is gone.
    pub async fn watch(
        &self,
        cancel: CancellationToken,
        tx: mpsc::Sender<StunnerConfig>,
        suppress_delete: bool,
    ) -> Result<(), ClientError> {
        let topic = &self.endpoint.topic;
        loop {
            match self.poll(cancel.clone(), tx.clone(), suppress_delete).await {
                Ok(()) => return Ok(()),
                Err(ClientError::ReceiverClosed) => {
                    tracing::debug!(topic = %topic, "Receiver dropped, watch stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Watch connection lost, retrying");
                    metrics::record_client_reconnect(topic);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.keepalive.retry_period()) => {}
            }
        }
    }

    /// Run a single connect and stream cycle.
    ///
    /// Returns `Ok(())` only when `cancel` fires; otherwise the error that
    /// ended the connection.
    pub async fn poll(
        &self,
        cancel: CancellationToken,
        tx: mpsc::Sender<StunnerConfig>,
        suppress_delete: bool,
    ) -> Result<(), ClientError> {
        let mut request = self.endpoint.ws.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_str(&self.endpoint.origin)?);

        tracing::debug!(url = %self.endpoint.ws, "Connecting");
        // A peer that accepts TCP but never answers the upgrade counts as a dial failure.
        let dial_wait = self.keepalive.pong_wait();
        let socket = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(dial_wait, connect_async(request)) => {
                result.map_err(|_| ClientError::DialTimeout(dial_wait))??.0
            }
        };
        tracing::info!(url = %self.endpoint.ws, "Watch connected");

        let (sink, mut source) = socket.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let conn = cancel.child_token();

        let pinger = tokio::spawn(ping_loop(
            Arc::clone(&sink),
            conn.clone(),
            self.keepalive.ping_period(),
            self.keepalive.write_wait(),
        ));
        let read_result = self.read_loop(&mut source, &conn, &tx, suppress_delete).await;
        conn.cancel();

        let ping_result = match pinger.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Pinger task failed");
                Ok(())
            }
        };

        let write_wait = self.keepalive.write_wait();
        let _ = tokio::time::timeout(write_wait, async {
            let mut sink = sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
        })
        .await;

        if cancel.is_cancelled() {
            tracing::debug!(url = %self.endpoint.ws, "Watch cancelled");
            return Ok(());
        }
        read_result?;
        ping_result?;
        Err(ClientError::Closed)
    }

    async fn read_loop(
        &self,
        source: &mut SplitStream<Socket>,
        conn: &CancellationToken,
        tx: &mpsc::Sender<StunnerConfig>,
        suppress_delete: bool,
    ) -> Result<(), ClientError> {
        let pong_wait = self.keepalive.pong_wait();
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let frame = tokio::select! {
                _ = conn.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => return Err(ClientError::PongTimeout(pong_wait)),
                frame = source.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(config) = self.decode(text.as_str(), suppress_delete) else {
                        continue;
                    };
                    tokio::select! {
                        _ = conn.cancelled() => return Ok(()),
                        sent = tx.send(config) => sent.map_err(|_| ClientError::ReceiverClosed)?,
                    }
                }
                Some(Ok(Message::Pong(_))) => deadline = Instant::now() + pong_wait,
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(frame = ?frame, "Server closed the watch");
                    return Err(ClientError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Closed),
            }
        }
    }

    /// Parse and validate one frame; `None` means drop it.
    fn decode(&self, text: &str, suppress_delete: bool) -> Option<StunnerConfig> {
        let config: StunnerConfig = match serde_json::from_str(text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(topic = %self.endpoint.topic, error = %e, "Dropping unparsable config");
                return None;
            }
        };
        if let Err(e) = config.validate() {
            tracing::warn!(topic = %self.endpoint.topic, error = %e, "Dropping invalid config");
            return None;
        }
        if suppress_delete && is_deleted(&config) {
            tracing::debug!(id = %config.admin.name, "Suppressing deletion");
            return None;
        }
        tracing::debug!(config = %config, "Config received");
        Some(config)
    }
}

async fn ping_loop(
    sink: SharedSink,
    conn: CancellationToken,
    ping_period: Duration,
    write_wait: Duration,
) -> Result<(), ClientError> {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    loop {
        tokio::select! {
            _ = conn.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let result = tokio::time::timeout(write_wait, async {
            let mut sink = sink.lock().await;
            sink.send(Message::Ping(Default::default())).await
        })
        .await;

        let error = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => ClientError::from(e),
            Err(_) => ClientError::WriteTimeout,
        };
        tracing::debug!(error = %error, "Ping failed");
        conn.cancel();
        return Err(error);
    }
}
