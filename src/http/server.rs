//! CDS server: reconciliation entry points and HTTP serving.
//!
//! # Responsibilities
//! - Own the config store and the connection tracker
//! - Turn desired-state snapshots into minimal upserts and deletes
//! - Apply the deletion policy (sentinel or silent, optional debounce)
//! - Force per-node resends
//! - Create the Axum router and run it until closed

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api::{parse_id, zero_config, Config, LicenseStatus, StunnerConfig};
use crate::http::handlers;
use crate::net::{Conn, ConnTrack};
use crate::settings::{KeepaliveSettings, ServerSettings};
use crate::store::{ConfigStore, Filter, Patch};

/// Rewrites a document for the node a watcher runs on.
pub type NodePatcher = Arc<dyn Fn(StunnerConfig, &str) -> StunnerConfig + Send + Sync>;

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
    #[error("server already started")]
    AlreadyStarted,
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

struct ServerInner {
    settings: ServerSettings,
    keepalive: KeepaliveSettings,
    store: ConfigStore<String>,
    conns: ConnTrack,
    license: ArcSwap<LicenseStatus>,
    patcher: parking_lot::RwLock<Option<NodePatcher>>,
    /// Deletions waiting out the debounce delay, by config id.
    pending_deletes: tokio::sync::Mutex<HashMap<String, CancellationToken>>,
    /// Debounce tasks, drained on close.
    delete_tasks: parking_lot::Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    serve_task: parking_lot::Mutex<Option<JoinHandle<Result<(), ServerError>>>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

/// The configuration discovery server.
///
/// Cheap to clone; all clones share one store and one connection tracker.
#[derive(Clone)]
pub struct CdsServer {
    inner: Arc<ServerInner>,
}

impl CdsServer {
    /// Create a server. Nothing is bound until [`CdsServer::start`] or
    /// [`CdsServer::serve`].
    pub fn new(settings: ServerSettings, keepalive: KeepaliveSettings) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                settings,
                keepalive,
                store: ConfigStore::new(),
                conns: ConnTrack::new(),
                license: ArcSwap::from_pointee(LicenseStatus::default()),
                patcher: parking_lot::RwLock::new(None),
                pending_deletes: tokio::sync::Mutex::new(HashMap::new()),
                delete_tasks: parking_lot::Mutex::new(JoinSet::new()),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                serve_task: parking_lot::Mutex::new(None),
                local_addr: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &ConfigStore<String> {
        &self.inner.store
    }

    pub fn conns(&self) -> &ConnTrack {
        &self.inner.conns
    }

    pub fn keepalive(&self) -> KeepaliveSettings {
        self.inner.keepalive
    }

    /// Token cancelled when the server closes.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Address the server is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Install the callback applied to documents sent to node-scoped watches.
    pub fn set_patcher(&self, patcher: NodePatcher) {
        *self.inner.patcher.write() = Some(patcher);
    }

    pub fn with_patcher(self, patcher: NodePatcher) -> Self {
        self.set_patcher(patcher);
        self
    }

    pub fn license_status(&self) -> LicenseStatus {
        LicenseStatus::clone(&self.inner.license.load())
    }

    pub fn set_license_status(&self, status: LicenseStatus) {
        self.inner.license.store(Arc::new(status));
    }

    /// Filter and patch for a watch bound to `node`.
    pub(crate) fn node_hooks(&self, node: &str) -> (Filter<String>, Option<Patch>) {
        let target = node.to_string();
        let filter: Filter<String> = Arc::new(move |t: &String| *t == target);
        let patch = self.inner.patcher.read().clone().map(|patcher| {
            let node = node.to_string();
            let patch: Patch = Arc::new(move |cfg| patcher(cfg, &node));
            patch
        });
        (filter, patch)
    }

    /// Apply the complete desired state.
    ///
    /// Configs missing from `desired` are deleted, changed ones are upserted,
    /// equal ones are left alone. Repeating a call is a no-op.
    pub async fn update_config(&self, desired: Vec<Config>) -> Result<(), ServerError> {
        let current = self.inner.store.snapshot();
        tracing::debug!(current = current.len(), desired = desired.len(), "Processing config update");

        let mut wanted: HashMap<String, &Config> = HashMap::with_capacity(desired.len());
        for config in &desired {
            wanted.insert(config.id(), config);
        }

        let mut existing = HashSet::with_capacity(current.len());
        for old in &current {
            let id = old.id();
            match wanted.get(&id) {
                None => self.delete_config(&id).await,
                Some(new) if new.config == old.config => {
                    self.cancel_pending_delete(&id).await;
                    tracing::trace!(id = %id, "Config unchanged");
                }
                Some(new) => self.upsert_config(&id, new.config.clone()).await,
            }
            existing.insert(id);
        }

        for (id, new) in wanted {
            if !existing.contains(&id) {
                self.upsert_config(&id, new.config.clone()).await;
            }
        }

        Ok(())
    }

    /// Add or replace a single config. Malformed ids are ignored.
    pub async fn upsert_config(&self, id: &str, config: StunnerConfig) {
        let Some((namespace, name)) = parse_id(id) else {
            tracing::debug!(id = %id, "Ignoring upsert with malformed id");
            return;
        };
        self.cancel_pending_delete(id).await;
        if self.inner.store.upsert(namespace, name, config).await {
            tracing::info!(id = %id, "Config updated");
        }
    }

    /// Remove a single config, honouring the deletion delay and
    /// suppression policy. Malformed ids are ignored.
    pub async fn delete_config(&self, id: &str) {
        let Some((namespace, name)) = parse_id(id) else {
            tracing::debug!(id = %id, "Ignoring delete with malformed id");
            return;
        };

        let delay = self.inner.settings.deletion_update_delay();
        if delay.is_zero() {
            self.apply_delete(namespace, name).await;
            return;
        }

        let mut pending = self.inner.pending_deletes.lock().await;
        if pending.contains_key(id) {
            tracing::trace!(id = %id, "Deletion already pending");
            return;
        }
        let token = self.inner.shutdown.child_token();
        pending.insert(id.to_string(), token.clone());
        drop(pending);

        tracing::debug!(id = %id, delay = ?delay, "Deletion scheduled");
        let server = self.clone();
        let (namespace, name) = (namespace.to_string(), name.to_string());
        let mut tasks = self.inner.delete_tasks.lock();
        // Reap finished debounces so the set only holds live ones.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let id = crate::api::config_id(&namespace, &name);
            // Holding the pending lock orders us against a racing upsert.
            let mut pending = server.inner.pending_deletes.lock().await;
            if token.is_cancelled() {
                return;
            }
            pending.remove(&id);
            server.apply_delete(&namespace, &name).await;
        });
        drop(tasks);
    }

    async fn cancel_pending_delete(&self, id: &str) {
        if let Some(token) = self.inner.pending_deletes.lock().await.remove(id) {
            token.cancel();
            tracing::debug!(id = %id, "Pending deletion cancelled");
        }
    }

    async fn apply_delete(&self, namespace: &str, name: &str) {
        let sentinel = if self.inner.settings.suppress_deletion {
            None
        } else {
            Some(zero_config(namespace, name))
        };
        if self.inner.store.delete(namespace, name, sentinel).await {
            tracing::info!(namespace = %namespace, name = %name, "Config deleted");
        }
    }

    /// Resend the current state to every watch bound to `node`.
    pub async fn push_node_config(&self, node: &str) -> usize {
        let sent = self.inner.store.push(&node.to_string()).await;
        tracing::debug!(node = %node, sent, "Node config pushed");
        sent
    }

    /// Live watch connections.
    pub fn clients(&self) -> Vec<Arc<Conn>> {
        self.inner.conns.snapshot()
    }

    /// Forcibly disconnect the client with the given connection id.
    pub fn remove_client(&self, id: &str) -> bool {
        match self.inner.conns.delete(id) {
            Some(conn) => {
                conn.close();
                tracing::info!(connection = %id, "Client disconnected by request");
                true
            }
            None => false,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/configs", get(handlers::list_all))
            .route("/api/v1/configs/{namespace}", get(handlers::list_namespace))
            .route("/api/v1/configs/{namespace}/{name}", get(handlers::get_config))
            .route("/api/v1/license", get(handlers::get_license))
            .with_state(self.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        self.inner.settings.request_timeout_secs,
                    ))),
            )
    }

    /// Serve on an already bound listener until the server is closed.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(addr);
        tracing::info!(address = %addr, "CDS server starting");

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(self.inner.shutdown.clone().cancelled_owned())
            .await?;

        tracing::info!("CDS server stopped");
        Ok(())
    }

    /// Bind the configured address and serve in the background.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let bind = self.inner.settings.bind_address.clone();
        let bound = match TcpListener::bind(&bind).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)).map_err(ServerError::from),
            Err(source) => Err(ServerError::Bind { addr: bind, source }),
        };
        let (listener, addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *self.inner.local_addr.lock() = Some(addr);

        let server = self.clone();
        let task = tokio::spawn(async move { server.serve(listener).await });
        *self.inner.serve_task.lock() = Some(task);
        Ok(addr)
    }

    /// Stop serving, close every subscription and connection, and wait for
    /// the accept loop and the connection tasks to finish.
    pub async fn close(&self) -> Result<(), ServerError> {
        tracing::info!("Closing CDS server");
        self.inner.shutdown.cancel();
        self.inner.store.unsubscribe_all();

        let task = self.inner.serve_task.lock().take();
        if let Some(task) = task {
            task.await??;
        }

        let mut deletes = std::mem::take(&mut *self.inner.delete_tasks.lock());
        while let Some(result) = deletes.join_next().await {
            result?;
        }

        // Connection tasks unregister themselves once their loops exit.
        let deadline = tokio::time::Instant::now() + self.inner.keepalive.write_wait() * 2;
        while !self.inner.conns.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if !self.inner.conns.is_empty() {
            tracing::warn!(remaining = self.inner.conns.len(), "Connections still open after close");
        }
        Ok(())
    }
}

/// Patcher that fills in a missing listener public address with the
/// external address of the node the watcher runs on.
pub fn node_address_patcher(addresses: Arc<ArcSwap<BTreeMap<String, String>>>) -> NodePatcher {
    Arc::new(move |mut cfg: StunnerConfig, node: &str| {
        if let Some(addr) = addresses.load().get(node) {
            for listener in cfg.listeners.iter_mut().filter(|l| l.public_address.is_none()) {
                listener.public_address = Some(addr.clone());
            }
        }
        cfg
    })
}
