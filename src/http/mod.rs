//! HTTP and websocket serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, middleware, lifecycle)
//!     → handlers.rs (snapshot GETs, or upgrade when watch=true)
//!     → websocket.rs (replay, stream updates, keepalive)
//! ```
//!
//! # Design Decisions
//! - Reconciliation lives on the server so the daemon and tests drive the
//!   same entry points
//! - One subscription per websocket; it is removed when the socket ends

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::{node_address_patcher, CdsServer, NodePatcher, ServerError};
pub use websocket::WatchRequest;
