//! CLI entry point: `clap::Parser`/tracing-subscriber wiring around the
//! single `serve` subcommand this core needs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mail_store::memory::InMemoryStore;
use mail_store::NotificationBus;
use mail_user::{ConnectionRegistry, CredentialVault};
use mailcore::{read_config, Server, Telemetry};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the IMAP daemon.
    Serve {
        #[clap(
            short,
            long,
            env = "MAILCORE_CONFIG",
            default_value = "mailcore.toml"
        )]
        config_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "mailcore=info,mail_proto=info,mail_user=info");
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    match args.command {
        Command::Serve { config_file } => serve(config_file).await,
    }
}

async fn serve(config_file: PathBuf) -> Result<()> {
    let config = read_config(&config_file)?;

    // No external database configured: the in-memory reference store
    // backs the core until a real MailboxStore backend is wired in.
    let store: Arc<dyn mail_store::MailboxStore> = Arc::new(InMemoryStore::new());
    let vault = Arc::new(CredentialVault::new(store.clone()));
    let registry = Arc::new(ConnectionRegistry::new());
    let notify = Arc::new(NotificationBus::default());
    let telemetry = Arc::new(Telemetry::new());

    let server = Arc::new(Server::new(
        &config.imap,
        config.auth.connection_cap,
        config.server_name.clone(),
        store,
        vault,
        registry,
        notify,
        telemetry.clone(),
    ));

    let (exit_tx, exit_rx) = watch::channel(false);
    let shutdown_signal = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = exit_tx.send(true);
    });

    server.run(exit_rx).await?;
    shutdown_signal.abort();
    telemetry.log_snapshot();

    Ok(())
}
