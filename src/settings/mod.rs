//! Settings management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CdsSettings (validated, immutable)
//!
//! desired-state file (JSON)
//!     → watcher.rs detects change
//!     → loader.rs loads and validates every document
//!     → DesiredState handed to the server's reconciliation
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal settings files
//! - Validation separates syntactic (serde) from semantic checks
//! - An invalid desired-state file is rejected whole; the current state stays

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_desired_state, load_settings, DesiredState, LoadError};
pub use schema::{CdsSettings, ClientSettings, KeepaliveSettings, ObservabilitySettings, ServerSettings};
pub use validation::{validate_keepalive, validate_settings, SettingsError};
pub use watcher::DesiredStateWatcher;
