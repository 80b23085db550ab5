//! Startup orchestration for the daemon.
//!
//! # Responsibilities
//! - Initialize metrics when enabled
//! - Start the CDS server
//! - Load the desired state and follow its file
//! - Close the server on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The first desired state must load; later bad reloads are only logged
//! - Shutdown has timeout: the daemon exits after the deadline regardless

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::http::{node_address_patcher, CdsServer, ServerError};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics::init_metrics;
use crate::settings::{load_desired_state, CdsSettings, DesiredState, DesiredStateWatcher, LoadError};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

type NodeAddresses = Arc<ArcSwap<BTreeMap<String, String>>>;

/// Error type for daemon startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("failed to load desired state: {0}")]
    Load(#[from] LoadError),
    #[error("failed to watch desired state: {0}")]
    Watch(#[from] notify::Error),
    #[error("invalid metrics address: {0}")]
    MetricsAddress(#[from] std::net::AddrParseError),
}

/// Run the daemon until `shutdown` is triggered.
pub async fn run(settings: CdsSettings, shutdown: Shutdown) -> Result<(), StartupError> {
    if settings.observability.metrics_enabled {
        let addr: SocketAddr = settings.observability.metrics_address.parse()?;
        init_metrics(addr);
    }

    let nodes: NodeAddresses = Arc::new(ArcSwap::from_pointee(BTreeMap::new()));
    let server = CdsServer::new(settings.server.clone(), settings.keepalive)
        .with_patcher(node_address_patcher(Arc::clone(&nodes)));
    let addr = server.start().await?;
    tracing::info!(address = %addr, "CDS server listening");

    // The watcher stops when its handle is dropped.
    let mut _watcher = None;
    let mut updates = None;
    if let Some(path) = settings.server.desired_state_path.as_deref() {
        let path = Path::new(path);
        let initial = load_desired_state(path)?;
        apply_desired_state(&server, &nodes, initial).await?;

        let (watcher, rx) = DesiredStateWatcher::new(path);
        _watcher = Some(watcher.run()?);
        updates = Some(rx);
    }

    loop {
        let next = async {
            match updates.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };
        let state = tokio::select! {
            _ = shutdown.wait() => break,
            state = next => state,
        };
        match state {
            Some(state) => apply_desired_state(&server, &nodes, state).await?,
            None => {
                tracing::warn!("Desired state watcher stopped");
                updates = None;
            }
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server.close()).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!(timeout = ?SHUTDOWN_TIMEOUT, "Shutdown timed out"),
    }
    Ok(())
}

/// Install node addresses, reconcile the configs, then resend to every node
/// whose address changed.
pub async fn apply_desired_state(
    server: &CdsServer,
    nodes: &NodeAddresses,
    state: DesiredState,
) -> Result<(), ServerError> {
    let previous = nodes.swap(Arc::new(state.nodes.clone()));
    let changed: Vec<&String> = state
        .nodes
        .keys()
        .chain(previous.keys())
        .filter(|node| state.nodes.get(*node) != previous.get(*node))
        .collect();

    server.update_config(state.configs).await?;

    let mut seen = Vec::new();
    for node in changed {
        if !seen.contains(&node) {
            server.push_node_config(node).await;
            seen.push(node);
        }
    }
    Ok(())
}
