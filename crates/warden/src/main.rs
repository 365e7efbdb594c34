use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden::telemetry::init_tracing;
use warden::{RuleStore, Supervisor};
use warden_core::config::{load_config, load_config_from};
use warden_xmpp::NativeTcpTransport;

/// XMPP multi-user chat moderation bot
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and rule files, then exit
    #[arg(long)]
    check: bool,
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
                return;
            }
            Err(error) => warn!(error = %error, "unable to register SIGTERM handler"),
        }
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received SIGINT, shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = match &cli.config {
        Some(path) => load_config_from(path.clone()),
        None => load_config(),
    }
    .context("failed to load configuration")?;
    init_tracing(&config.logging.level).context("failed to initialise logging")?;

    let rules = RuleStore::load(config.bot.whitelist_path(), config.bot.blacklist_path())
        .context("failed to load rule files")?;
    let current = rules.current();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        jid = %config.account.full_jid(),
        rooms = config.rooms.len(),
        whitelist = current.whitelist_len(),
        blacklist = current.blacklist_len(),
        "warden starting"
    );
    if cli.check {
        info!("configuration and rules are valid");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.cancel();
        }
    });

    Supervisor::<NativeTcpTransport>::new(Arc::new(config), Arc::new(rules))
        .run(shutdown)
        .await;
    Ok(())
}
