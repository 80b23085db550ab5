//! Topic-indexed config map with live fan-out to subscribers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};

use crate::api::{config_id, Config, StunnerConfig};
use crate::observability::metrics;
use crate::store::topic::Topic;

/// Minimum capacity of a subscription channel.
pub const CHANNEL_BUFFER: usize = 256;

/// Decides whether a subscription wants a forced resend for a push target.
pub type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Rewrites a document just before it is handed to one subscriber.
pub type Patch = Arc<dyn Fn(StunnerConfig) -> StunnerConfig + Send + Sync>;

/// Handle identifying a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription<T> {
    id: SubscriptionId,
    topic: Topic,
    tx: mpsc::Sender<Config>,
    filter: Option<Filter<T>>,
    patch: Option<Patch>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            topic: self.topic.clone(),
            tx: self.tx.clone(),
            filter: self.filter.clone(),
            patch: self.patch.clone(),
        }
    }
}

impl<T> Subscription<T> {
    fn prepare(&self, config: &Config) -> Config {
        let mut update = config.clone();
        if let Some(patch) = &self.patch {
            update.config = patch(update.config);
        }
        update
    }
}

/// Receiving end of a subscription.
///
/// Yields `None` once the subscription is removed and every queued update has
/// been drained. The holder must keep draining it: a full channel stalls the
/// store mutation that is trying to deliver to it.
#[derive(Debug)]
pub struct ConfigStream {
    id: SubscriptionId,
    rx: mpsc::Receiver<Config>,
}

impl ConfigStream {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Config> {
        self.rx.recv().await
    }

    /// Take an already queued update without waiting.
    pub fn try_recv(&mut self) -> Option<Config> {
        self.rx.try_recv().ok()
    }
}

struct Inner<T> {
    configs: BTreeMap<String, Config>,
    subscriptions: Vec<Subscription<T>>,
}

impl<T> Inner<T> {
    fn matching(&self, namespace: &str, name: &str) -> Vec<Subscription<T>> {
        self.subscriptions
            .iter()
            .filter(|s| s.topic.matches_id(namespace, name))
            .cloned()
            .collect()
    }
}

/// The single source of truth for the configs that currently exist.
///
/// `T` is the push target type (a node name in the server) that subscription
/// filters are evaluated against; it is never compared with config content.
pub struct ConfigStore<T = String> {
    inner: RwLock<Inner<T>>,
    /// Serializes mutations and their fan-out.
    serial: Mutex<()>,
    next_id: AtomicU64,
}

impl<T> Default for ConfigStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConfigStore<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                configs: BTreeMap::new(),
                subscriptions: Vec::new(),
            }),
            serial: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Look up one config.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Config> {
        self.inner.read().configs.get(&config_id(namespace, name)).cloned()
    }

    /// Copy of every stored config, ordered by identity.
    pub fn snapshot(&self) -> Vec<Config> {
        self.inner.read().configs.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().configs.is_empty()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.read().subscriptions.len()
    }

    /// Store `config` under `namespace/name` and notify matching subscribers.
    ///
    /// Returns `false` without notifying anyone if an equal document is
    /// already stored.
    pub async fn upsert(&self, namespace: &str, name: &str, config: StunnerConfig) -> bool {
        let _serial = self.serial.lock().await;
        let id = config_id(namespace, name);
        let entry = Config::new(namespace, name, config);

        let subscribers = {
            let mut inner = self.inner.write();
            if inner.configs.get(&id).is_some_and(|c| c.config == entry.config) {
                tracing::trace!(id = %id, "Config unchanged, skipping upsert");
                return false;
            }
            inner.configs.insert(id.clone(), entry.clone());
            metrics::record_config_count(inner.configs.len());
            inner.matching(namespace, name)
        };

        tracing::debug!(id = %id, subscribers = subscribers.len(), "Config upserted");
        metrics::record_config_update("upsert");
        let deliveries = subscribers
            .into_iter()
            .map(|sub| {
                let update = sub.prepare(&entry);
                (sub, update)
            })
            .collect();
        self.send_all(deliveries).await;
        true
    }

    /// Remove `namespace/name`.
    ///
    /// With a sentinel the removal is announced to matching subscribers,
    /// without one it is silent. Returns whether the config existed; nothing
    /// is announced for a config that was never stored.
    pub async fn delete(&self, namespace: &str, name: &str, sentinel: Option<StunnerConfig>) -> bool {
        let _serial = self.serial.lock().await;
        let id = config_id(namespace, name);

        let subscribers = {
            let mut inner = self.inner.write();
            if inner.configs.remove(&id).is_none() {
                tracing::trace!(id = %id, "Delete of unknown config ignored");
                return false;
            }
            metrics::record_config_count(inner.configs.len());
            if sentinel.is_some() {
                inner.matching(namespace, name)
            } else {
                Vec::new()
            }
        };

        metrics::record_config_update("delete");
        match sentinel {
            Some(sentinel) => {
                tracing::debug!(id = %id, subscribers = subscribers.len(), "Config deleted, announcing");
                let entry = Config::new(namespace, name, sentinel);
                let deliveries = subscribers
                    .into_iter()
                    .map(|sub| {
                        let update = sub.prepare(&entry);
                        (sub, update)
                    })
                    .collect();
                self.send_all(deliveries).await;
            }
            None => tracing::debug!(id = %id, "Config deleted silently"),
        }
        true
    }

    /// Subscribe to every config.
    pub async fn subscribe_all(&self, filter: Option<Filter<T>>, patch: Option<Patch>) -> ConfigStream {
        self.subscribe(Topic::All, filter, patch).await
    }

    /// Subscribe to the configs of one namespace.
    pub async fn subscribe_namespace(
        &self,
        namespace: &str,
        filter: Option<Filter<T>>,
        patch: Option<Patch>,
    ) -> ConfigStream {
        self.subscribe(Topic::namespace(namespace), filter, patch).await
    }

    /// Subscribe to a single config.
    pub async fn subscribe_config(
        &self,
        namespace: &str,
        name: &str,
        filter: Option<Filter<T>>,
        patch: Option<Patch>,
    ) -> ConfigStream {
        self.subscribe(Topic::config(namespace, name), filter, patch).await
    }

    /// Register a subscription and replay the matching current state into it.
    pub async fn subscribe(&self, topic: Topic, filter: Option<Filter<T>>, patch: Option<Patch>) -> ConfigStream {
        let _serial = self.serial.lock().await;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let (sub, rx, replay) = {
            let mut inner = self.inner.write();
            let replay: Vec<Config> = inner
                .configs
                .values()
                .filter(|c| topic.matches(c))
                .cloned()
                .collect();
            // Room for the whole replay, so registering never waits on the reader.
            let (tx, rx) = mpsc::channel(CHANNEL_BUFFER.max(replay.len()));
            let sub = Subscription {
                id,
                topic,
                tx,
                filter,
                patch,
            };
            inner.subscriptions.push(sub.clone());
            metrics::record_subscription_count(inner.subscriptions.len());
            (sub, rx, replay)
        };

        tracing::debug!(subscription = %id, topic = %sub.topic, replay = replay.len(), "Subscribed");
        for config in &replay {
            if let Err(e) = sub.tx.try_send(sub.prepare(config)) {
                tracing::warn!(subscription = %id, error = %e, "Replay dropped");
            }
        }

        ConfigStream { id, rx }
    }

    /// Remove a subscription, closing its channel.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.write();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);
        metrics::record_subscription_count(inner.subscriptions.len());
        let removed = inner.subscriptions.len() < before;
        if removed {
            tracing::debug!(subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Remove every subscription, closing all channels.
    pub fn unsubscribe_all(&self) {
        let mut inner = self.inner.write();
        let count = inner.subscriptions.len();
        inner.subscriptions.clear();
        metrics::record_subscription_count(0);
        tracing::debug!(count, "All subscriptions closed");
    }

    /// Resend the current matching state to every subscription whose filter
    /// accepts `target`, whether or not anything changed.
    ///
    /// Returns the number of updates delivered.
    pub async fn push(&self, target: &T) -> usize
    where
        T: Sync,
    {
        let _serial = self.serial.lock().await;
        let (subscriptions, configs) = {
            let inner = self.inner.read();
            (
                inner.subscriptions.clone(),
                inner.configs.values().cloned().collect::<Vec<_>>(),
            )
        };

        let mut deliveries = Vec::new();
        for sub in subscriptions {
            let accepted = sub.filter.as_ref().is_some_and(|filter| filter(target));
            if !accepted {
                continue;
            }
            for config in configs.iter().filter(|c| sub.topic.matches(c)) {
                let update = sub.prepare(config);
                deliveries.push((sub.clone(), update));
            }
        }

        metrics::record_config_update("push");
        self.send_all(deliveries).await
    }

    async fn send_all(&self, deliveries: Vec<(Subscription<T>, Config)>) -> usize {
        let mut sent = 0;
        let mut gone = Vec::new();
        for (sub, update) in deliveries {
            if gone.contains(&sub.id) {
                continue;
            }
            match sub.tx.send(update).await {
                Ok(()) => sent += 1,
                Err(_) => {
                    tracing::debug!(subscription = %sub.id, topic = %sub.topic, "Subscriber gone, pruning");
                    gone.push(sub.id);
                }
            }
        }

        if !gone.is_empty() {
            let mut inner = self.inner.write();
            inner.subscriptions.retain(|s| !gone.contains(&s.id));
            metrics::record_subscription_count(inner.subscriptions.len());
        }
        sent
    }
}
