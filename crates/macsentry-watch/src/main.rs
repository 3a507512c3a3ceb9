//! CLI entry point for the macsentry LAN watch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use macsentry_core::MacAddress;
use macsentry_watch::action::sink_from_config;
use macsentry_watch::config::{load_config, WatchConfig};
use macsentry_watch::engine::AlarmEngine;
use macsentry_watch::scanner::{NmapProber, Prober};
use macsentry_watch::whitelist::WhitelistStore;

#[derive(Parser)]
#[command(name = "macsentry")]
#[command(about = "Learns the devices on a LAN segment and alarms on unknown hardware addresses")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (created with defaults if missing).
    #[arg(short, long, default_value = "macsentry.json", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Learn, then watch for unknown devices until interrupted (default).
    Run,
    /// Sweep the configured range once and print the addresses found.
    Scan,
    /// Inspect or edit the learned whitelist (stop a running daemon before editing).
    Whitelist {
        #[command(subcommand)]
        action: WhitelistCommand,
    },
}

#[derive(Subcommand)]
enum WhitelistCommand {
    /// Print every whitelisted address.
    List,
    /// Add addresses to the whitelist.
    ///
    /// A running daemon never rereads the file. It keeps its own copy and
    /// overwrites the file on its next save, discarding this edit. Stop the
    /// daemon first.
    Add {
        #[arg(required = true)]
        macs: Vec<MacAddress>,
    },
    /// Remove addresses from the whitelist.
    ///
    /// A running daemon never rereads the file. It keeps its own copy and
    /// overwrites the file on its next save, so a removed address comes
    /// back. Stop the daemon first.
    Remove {
        #[arg(required = true)]
        macs: Vec<MacAddress>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %cli.config.display(), error = %e, "Failed to load configuration, exiting");
            return Err(e.into());
        }
    };
    let store = WhitelistStore::new(&config.whitelist_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config, store).await,
        Command::Scan => scan_once(&config).await,
        Command::Whitelist { action } => edit_whitelist(&store, action),
    }
}

async fn run_daemon(config: WatchConfig, store: WhitelistStore) -> anyhow::Result<()> {
    let prober = nmap_prober(&config).await;
    let sink = sink_from_config(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut engine = AlarmEngine::new(config, store, prober, sink);
    engine.run(shutdown_rx).await;
    Ok(())
}

async fn scan_once(config: &WatchConfig) -> anyhow::Result<()> {
    let prober = nmap_prober(config).await;
    let result = prober.scan(&config.network_range).await?;
    for mac in &result.devices {
        println!("{mac}");
    }
    tracing::info!(devices = result.devices.len(), "Sweep finished");
    Ok(())
}

fn edit_whitelist(store: &WhitelistStore, action: WhitelistCommand) -> anyhow::Result<()> {
    match action {
        WhitelistCommand::List => {
            for mac in store.load().iter() {
                println!("{mac}");
            }
        }
        WhitelistCommand::Add { macs } => {
            let mut whitelist = store.load();
            let added = macs.into_iter().filter(|mac| whitelist.insert(*mac)).count();
            store.save(&whitelist)?;
            tracing::info!(added, devices = whitelist.len(), "Whitelist updated");
        }
        WhitelistCommand::Remove { macs } => {
            let mut whitelist = store.load();
            let removed = macs.iter().filter(|mac| whitelist.remove(mac)).count();
            store.save(&whitelist)?;
            tracing::info!(removed, devices = whitelist.len(), "Whitelist updated");
        }
    }
    Ok(())
}

/// Build the nmap prober, warning up front if the binary is unusable.
async fn nmap_prober(config: &WatchConfig) -> Arc<dyn Prober> {
    let prober = NmapProber::new(&config.nmap_path, config.probe_timeout());
    match prober.verify_installation().await {
        Ok(version) => {
            let version = version.lines().next().unwrap_or_default().trim().to_string();
            tracing::info!(nmap_version = %version, "Nmap verified");
        }
        Err(e) => tracing::error!(error = %e, "Nmap unavailable, every sweep will come back empty"),
    }
    Arc::new(prober)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
