//! Network connection bookkeeping.
//!
//! # Data Flow
//! ```text
//! Watch request upgraded to websocket
//!     → conntrack.rs (register connection under its remote address)
//!     → per-connection tasks run until the peer leaves or is kicked
//!     → guard drop unregisters the connection
//! ```
//!
//! # Design Decisions
//! - Tracking is for diagnostics and forced disconnects only; it never
//!   touches the config store
//! - Each connection carries its own cancellation token, a child of the
//!   server's, so closing the server closes every connection

pub mod conntrack;

pub use conntrack::{Conn, ConnGuard, ConnTrack};
