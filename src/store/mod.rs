//! In-memory config store with topic subscriptions.
//!
//! # Data Flow
//! ```text
//! reconciliation (server)
//!     → ConfigStore::upsert / delete / push
//!     → topic.rs (which subscriptions care?)
//!     → bounded mpsc channel per subscription
//!     → per-connection sender task (server) or local consumer
//! ```
//!
//! # Design Decisions
//! - One lock guards the config map and the subscription list; it is never
//!   held across a channel send
//! - Sends are awaited: a full subscription channel suspends the mutation
//!   that produced the notification (backpressure), while a dropped receiver
//!   fails fast and its subscription is pruned
//! - Mutations are serialized end-to-end so every channel observes changes
//!   in the order they were applied

pub mod config_store;
pub mod topic;

pub use config_store::{ConfigStore, ConfigStream, Filter, Patch, SubscriptionId, CHANNEL_BUFFER};
pub use topic::Topic;
