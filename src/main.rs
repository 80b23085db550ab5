//! STUNner Configuration Discovery Service (daemon)
//!
//! ```text
//!   desired-state file ──notify──→ ┌──────────────────────────────┐
//!                                  │            CDS               │
//!                                  │  update_config (diff)        │
//!                                  │        │                     │
//!                                  │        ▼                     │
//!                                  │  ConfigStore ──→ topics ─────┼──ws──→ dataplanes
//!                                  │                              │
//!                                  │  GET /api/v1/configs[...]    │←─http── operators
//!                                  └──────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use stunner_cds::lifecycle::{self, signals, Shutdown};
use stunner_cds::observability::logging;
use stunner_cds::settings::{load_settings, CdsSettings};

#[derive(Parser)]
#[command(name = "stunner-cds")]
#[command(about = "STUNner configuration discovery service", long_about = None)]
struct Args {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the desired-state file.
    #[arg(short, long)]
    desired_state: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => CdsSettings::default(),
    };
    if let Some(bind) = args.bind {
        settings.server.bind_address = bind;
    }
    if let Some(path) = args.desired_state {
        settings.server.desired_state_path = Some(path.to_string_lossy().into_owned());
    }

    logging::init(&settings.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "stunner-cds starting");
    tracing::info!(
        bind_address = %settings.server.bind_address,
        suppress_deletion = settings.server.suppress_deletion,
        deletion_update_delay = ?settings.server.deletion_update_delay(),
        desired_state = ?settings.server.desired_state_path,
        "Settings loaded"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());
    lifecycle::run(settings, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
