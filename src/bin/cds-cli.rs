use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stunner_cds::client::{
    AllConfigsApi, ConfigClient, ConfigNamespaceNameApi, ConfigsNamespaceApi, LicenseApi,
};
use stunner_cds::lifecycle::signals;
use stunner_cds::observability::logging;
use stunner_cds::settings::KeepaliveSettings;
use stunner_cds::{ClientError, StunnerConfig};

#[derive(Parser)]
#[command(name = "cds-cli")]
#[command(about = "Query and watch a STUNner configuration discovery service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:13478")]
    url: String,

    /// Log level for client diagnostics.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Target {
    /// Namespace to query; all configs when omitted.
    #[arg(short, long)]
    namespace: Option<String>,

    /// Gateway name within the namespace.
    #[arg(short = 'g', long, requires = "namespace")]
    name: Option<String>,

    /// Node name, for node-specific patching.
    #[arg(long, requires = "name")]
    node: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current configs
    Get(Target),
    /// Stream config changes until interrupted
    Watch {
        #[command(flatten)]
        target: Target,

        /// Do not print deletion notices
        #[arg(long)]
        suppress_delete: bool,
    },
    /// Show the server's license status
    License,
}

fn client(url: &str, target: &Target) -> Result<ConfigClient, ClientError> {
    let keepalive = KeepaliveSettings::default();
    let client = match (&target.namespace, &target.name) {
        (Some(ns), Some(name)) => {
            let node = target.node.as_deref();
            ConfigNamespaceNameApi::new(url, ns, name, node, keepalive)?.into_inner()
        }
        (Some(ns), None) => ConfigsNamespaceApi::new(url, ns, keepalive)?.into_inner(),
        _ => AllConfigsApi::new(url, keepalive)?.into_inner(),
    };
    Ok(client)
}

async fn snapshot(url: &str, target: &Target) -> Result<Vec<StunnerConfig>, ClientError> {
    let keepalive = KeepaliveSettings::default();
    match (&target.namespace, &target.name) {
        (Some(ns), Some(name)) => {
            let node = target.node.as_deref();
            let config = ConfigNamespaceNameApi::new(url, ns, name, node, keepalive)?.get().await?;
            Ok(vec![config])
        }
        (Some(ns), None) => ConfigsNamespaceApi::new(url, ns, keepalive)?.get().await,
        _ => AllConfigsApi::new(url, keepalive)?.get().await,
    }
}

fn print(config: &StunnerConfig) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match cli.command {
        Commands::Get(target) => {
            for config in snapshot(&cli.url, &target).await? {
                print(&config)?;
            }
        }
        Commands::Watch {
            target,
            suppress_delete,
        } => {
            let client = client(&cli.url, &target)?;
            let cancel = CancellationToken::new();
            let (tx, mut rx) = mpsc::channel(16);

            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move { client.watch(cancel, tx, suppress_delete).await })
            };

            let signal = signals::wait_for_signal();
            tokio::pin!(signal);
            loop {
                tokio::select! {
                    _ = &mut signal => break,
                    update = rx.recv() => match update {
                        Some(config) => print(&config)?,
                        None => break,
                    },
                }
            }
            cancel.cancel();
            watcher.await??;
        }
        Commands::License => {
            let status = LicenseApi::new(&cli.url)?.get().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
