//! Failure injection: dead peers, forced disconnects, misbehaving servers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use stunner_cds::api::StunnerConfig;
use stunner_cds::client::AllConfigsApi;
use stunner_cds::settings::ServerSettings;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod common;

use common::{assert_silent, fast_keepalive, gateway, recv, start_server, wait_until};

/// Start a fake CDS that runs `script` on every watch connection.
async fn start_fake_server<F, Fut>(script: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(WebSocket) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let accepted = Arc::new(AtomicUsize::new(0));
    let handler = {
        let script = script.clone();
        move |State(accepted): State<Arc<AtomicUsize>>, ws: WebSocketUpgrade| {
            let script = script.clone();
            async move {
                accepted.fetch_add(1, Ordering::SeqCst);
                let response: Response = ws.on_upgrade(script);
                response
            }
        }
    };
    let app = Router::new()
        .route("/api/v1/configs", get(handler))
        .with_state(Arc::clone(&accepted));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, accepted)
}

#[tokio::test]
async fn test_server_drops_unresponsive_peer() {
    let (server, addr) = start_server(ServerSettings::default()).await;

    // A raw client that never reads never answers pings either.
    let url = format!("ws://{}/api/v1/configs?watch=true", addr);
    let (_socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    wait_until(|| server.conns().len() == 1).await;

    // pong_wait is 300ms
    wait_until(|| server.conns().is_empty()).await;
    assert_eq!(server.store().subscription_count(), 0);
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_live_peer_survives_keepalive() {
    let (server, addr) = start_server(ServerSettings::default()).await;
    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };
    wait_until(|| server.conns().len() == 1).await;
    let id = server.clients()[0].id().to_string();

    // Several pong_wait periods pass without any config traffic.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let clients = server.clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id(), id);

    let config = gateway("ns1", "gw1", 1);
    server.upsert_config("ns1/gw1", config.config.clone()).await;
    assert_eq!(recv(&mut rx).await, config.config);

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_client_reconnects_after_forced_disconnect() {
    let (server, addr) = start_server(ServerSettings::default()).await;
    let config = gateway("ns1", "gw1", 1);
    server.update_config(vec![config.clone()]).await.unwrap();

    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };
    assert_eq!(recv(&mut rx).await, config.config);
    wait_until(|| server.conns().len() == 1).await;

    // 1. Kick the client
    let id = server.clients()[0].id().to_string();
    let kicked = Instant::now();
    assert!(server.remove_client(&id));
    assert!(!server.remove_client("203.0.113.1:1"));

    // 2. It reconnects after one retry period and gets the current state replayed
    assert_eq!(recv(&mut rx).await, config.config);
    let budget = fast_keepalive().retry_period() * 2 + Duration::from_millis(500);
    assert!(
        kicked.elapsed() < budget,
        "replay took {:?}, expected under {:?}",
        kicked.elapsed(),
        budget
    );
    wait_until(|| server.conns().len() == 1).await;

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_client_recovers_after_server_close() {
    let (server, addr) = start_server(ServerSettings::default()).await;
    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };
    wait_until(|| server.conns().len() == 1).await;

    // The watcher keeps retrying against a closed server without returning.
    server.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!watcher.is_finished());
    assert_silent(&mut rx, Duration::from_millis(100)).await;

    cancel.cancel();
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bad_frames_are_dropped() {
    let good = gateway("ns1", "gw1", 3478).config;
    let frames = {
        let good = serde_json::to_string(&good).unwrap();
        let invalid = serde_json::to_string(&StunnerConfig::default()).unwrap();
        vec!["{not json".to_string(), invalid, good]
    };

    let (addr, _) = start_fake_server(move |mut socket: WebSocket| {
        let frames = frames.clone();
        async move {
            for frame in frames {
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            // Keep answering pings until the client leaves.
            while let Some(Ok(_)) = socket.recv().await {}
        }
    })
    .await;

    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };

    assert_eq!(recv(&mut rx).await, good);
    assert_silent(&mut rx, Duration::from_millis(500)).await;

    cancel.cancel();
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_redials_silent_server() {
    // The fake server holds the socket but never reads, so pings go unanswered.
    let (addr, accepted) = start_fake_server(|socket: WebSocket| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    })
    .await;

    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, _rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };

    wait_until(|| accepted.load(Ordering::SeqCst) >= 2).await;

    cancel.cancel();
    watcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_redials_stalled_handshake() {
    // Accepts TCP but never answers the websocket upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let acceptor = {
        let accepted = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        })
    };

    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<StunnerConfig>(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };

    // Each stalled dial gives up after pong_wait and the watcher dials again.
    wait_until(|| accepted.load(Ordering::SeqCst) >= 2).await;
    assert!(!watcher.is_finished());
    assert_silent(&mut rx, Duration::from_millis(50)).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    acceptor.abort();
}
