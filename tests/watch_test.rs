//! End-to-end watch tests through a real server and the client library.

use std::time::Duration;

use stunner_cds::api::is_deleted;
use stunner_cds::client::{AllConfigsApi, ConfigNamespaceNameApi, ConfigsNamespaceApi};
use stunner_cds::settings::ServerSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod common;

use common::{assert_silent, fast_keepalive, gateway, recv, start_server, wait_until};

const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_single_config_lifecycle() {
    // 1. Start server and watch ns1/gw1
    let (server, addr) = start_server(ServerSettings::default()).await;
    let api = ConfigNamespaceNameApi::new(&addr.to_string(), "ns1", "gw1", None, fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };
    wait_until(|| server.conns().len() == 1).await;

    // 2. Two gateways appear; only gw1 reaches this watcher
    let a = gateway("ns1", "gw1", 3478);
    let b = gateway("ns1", "gw2", 3479);
    server.update_config(vec![a.clone(), b.clone()]).await.unwrap();
    assert_eq!(recv(&mut rx).await, a.config);
    assert_silent(&mut rx, QUIET).await;

    // 3. gw1 disappears; the watcher gets the sentinel
    server.update_config(vec![b]).await.unwrap();
    let removed = recv(&mut rx).await;
    assert!(is_deleted(&removed));
    assert_eq!(removed.admin.name, "ns1/gw1");

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_replay_and_idempotence() {
    let (server, addr) = start_server(ServerSettings::default()).await;
    let desired = vec![
        gateway("ns1", "gw1", 1),
        gateway("ns1", "gw2", 2),
        gateway("ns2", "gw1", 3),
    ];
    server.update_config(desired.clone()).await.unwrap();

    // Existing state is replayed on connect, filtered to the namespace.
    let api = ConfigsNamespaceApi::new(&addr.to_string(), "ns1", fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };

    let mut names = vec![recv(&mut rx).await.admin.name, recv(&mut rx).await.admin.name];
    names.sort();
    assert_eq!(names, vec!["ns1/gw1", "ns1/gw2"]);
    assert_silent(&mut rx, QUIET).await;

    // The same desired state again produces nothing.
    server.update_config(desired).await.unwrap();
    assert_silent(&mut rx, QUIET).await;

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_topic_isolation() {
    let (server, addr) = start_server(ServerSettings::default()).await;
    let addr = addr.to_string();
    let cancel = CancellationToken::new();

    let (all_tx, mut all_rx) = mpsc::channel(16);
    let (ns_tx, mut ns_rx) = mpsc::channel(16);
    let all = AllConfigsApi::new(&addr, fast_keepalive()).unwrap();
    let ns2 = ConfigsNamespaceApi::new(&addr, "ns2", fast_keepalive()).unwrap();
    let handles = vec![
        {
            let cancel = cancel.clone();
            tokio::spawn(async move { all.watch(cancel, all_tx, false).await })
        },
        {
            let cancel = cancel.clone();
            tokio::spawn(async move { ns2.watch(cancel, ns_tx, false).await })
        },
    ];
    wait_until(|| server.conns().len() == 2).await;

    let ns1 = gateway("ns1", "gw1", 1);
    server.upsert_config("ns1/gw1", ns1.config.clone()).await;
    assert_eq!(recv(&mut all_rx).await, ns1.config);
    assert_silent(&mut ns_rx, QUIET).await;

    let ns2_gw = gateway("ns2", "gw1", 2);
    server.upsert_config("ns2/gw1", ns2_gw.config.clone()).await;
    assert_eq!(recv(&mut all_rx).await, ns2_gw.config);
    assert_eq!(recv(&mut ns_rx).await, ns2_gw.config);

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_client_side_delete_suppression() {
    let (server, addr) = start_server(ServerSettings::default()).await;
    server.update_config(vec![gateway("ns1", "gw1", 1)]).await.unwrap();

    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, true).await })
    };
    recv(&mut rx).await;

    server.update_config(vec![]).await.unwrap();
    assert_silent(&mut rx, QUIET).await;

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_server_side_delete_suppression() {
    let settings = ServerSettings {
        suppress_deletion: true,
        ..ServerSettings::default()
    };
    let (server, addr) = start_server(settings).await;
    server.update_config(vec![gateway("ns1", "gw1", 1)]).await.unwrap();

    let api = AllConfigsApi::new(&addr.to_string(), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };
    recv(&mut rx).await;

    server.update_config(vec![]).await.unwrap();
    assert_silent(&mut rx, QUIET).await;
    assert!(server.store().is_empty());

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_node_patch_and_push() {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use arc_swap::ArcSwap;
    use stunner_cds::http::node_address_patcher;

    let (server, addr) = start_server(ServerSettings::default()).await;
    let nodes = Arc::new(ArcSwap::from_pointee(BTreeMap::from([(
        "node-1".to_string(),
        "10.0.0.1".to_string(),
    )])));
    server.set_patcher(node_address_patcher(Arc::clone(&nodes)));
    server.update_config(vec![gateway("ns1", "gw1", 1)]).await.unwrap();

    let api = ConfigNamespaceNameApi::new(&addr.to_string(), "ns1", "gw1", Some("node-1"), fast_keepalive()).unwrap();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move { api.watch(cancel, tx, false).await })
    };

    let first = recv(&mut rx).await;
    assert_eq!(first.listeners[0].public_address.as_deref(), Some("10.0.0.1"));

    nodes.store(Arc::new(BTreeMap::from([("node-1".to_string(), "10.0.0.2".to_string())])));
    assert_eq!(server.push_node_config("node-2").await, 0);
    assert_silent(&mut rx, QUIET).await;

    assert_eq!(server.push_node_config("node-1").await, 1);
    let pushed = recv(&mut rx).await;
    assert_eq!(pushed.listeners[0].public_address.as_deref(), Some("10.0.0.2"));

    cancel.cancel();
    watcher.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_many_watchers_see_every_update_in_order() {
    let (server, addr) = start_server(ServerSettings::default()).await;
    let addr = addr.to_string();
    let cancel = CancellationToken::new();
    let watchers = 10;
    let updates: u16 = 20;

    let mut receivers = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..watchers {
        let api = ConfigNamespaceNameApi::new(&addr, "ns1", "gw1", None, fast_keepalive()).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { api.watch(cancel, tx, false).await }));
        receivers.push(rx);
    }
    wait_until(|| server.conns().len() == watchers).await;

    for port in 1..=updates {
        server.upsert_config("ns1/gw1", gateway("ns1", "gw1", port).config).await;
    }

    for rx in receivers.iter_mut() {
        for port in 1..=updates {
            assert_eq!(recv(rx).await.listeners[0].port, port);
        }
    }

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    server.close().await.unwrap();
    wait_until(|| server.conns().is_empty()).await;
}
