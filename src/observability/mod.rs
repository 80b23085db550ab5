//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! store / server / client produce:
//!     → tracing macros (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Prometheus scrape endpoint (daemon only)
//! ```
//!
//! # Design Decisions
//! - Library code only emits events; binaries install the subscriber
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
