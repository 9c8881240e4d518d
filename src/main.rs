//! wagate CLI entry point.
//!
//! Provides `start`, `status`, and `check` subcommands for running the
//! gateway, inspecting one tracked message, or validating configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use wagate::config::{runtime_paths, Config};
use wagate::http::{self, BearerAuth};
use wagate::ledger::{LedgerOptions, StatusLedger};
use wagate::service::Gateway;
use wagate::transport::bridge::BridgeTransport;
use wagate::transport::events::spawn_event_listener;
use wagate::transport::Transport;

/// wagate: WhatsApp messaging gateway.
#[derive(Parser)]
#[command(name = "wagate", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Start,
    /// Print the recorded status of one message and exit.
    Status {
        /// Provider message id.
        id: String,
    },
    /// Validate configuration and print resolved paths.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start().await,
        Command::Status { id } => handle_status(&id).await,
        Command::Check => handle_check(),
    }
}

fn ledger_options(config: &Config) -> LedgerOptions {
    LedgerOptions {
        receipt_policy: config.ledger.receipt_policy,
        strict_ids: config.ledger.strict_ids,
    }
}

/// Run the gateway until Ctrl-C.
async fn handle_start() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let paths = runtime_paths(&config)?;
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("failed to create {}", paths.root.display()))?;
    let _logging_guard = wagate::logging::init_production(&paths.logs_dir)?;

    let token = config
        .auth_token(|key| std::env::var(key).ok())
        .with_context(|| format!("{} is not set", config.server.auth_token_env))?;
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .context("server.bind is not a socket address")?;

    let ledger = StatusLedger::open(&paths.ledger_db, ledger_options(&config))
        .await
        .with_context(|| format!("failed to open ledger at {}", paths.ledger_db.display()))?;

    let bridge = BridgeTransport::new(&config.bridge);
    let (event_tx, event_rx) = mpsc::channel(config.events.channel_buffer);
    let listener = spawn_event_listener(bridge.base_url().to_owned(), event_tx);
    let transport: Arc<dyn Transport> = Arc::new(bridge);

    let (gateway, correlator) = Gateway::assemble(&config, transport, ledger)?;
    let gateway = Arc::new(gateway);
    let correlator_task = tokio::spawn(correlator.run(event_rx));

    match gateway.resume().await {
        Ok(true) => info!("resumed paired device"),
        Ok(false) => info!("no paired device, waiting for login"),
        Err(e) => warn!(error = %e, "failed to resume session"),
    }

    info!(
        %addr,
        bridge = %config.bridge.base_url,
        ledger = %paths.ledger_db.display(),
        "wagate started"
    );

    let router = http::router(Arc::clone(&gateway), BearerAuth::new(&token));
    let served = http::serve(addr, router, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown requested");
    })
    .await;

    listener.abort();
    if let Err(e) = correlator_task.await {
        warn!(error = %e, "correlator task ended abnormally");
    }
    served.context("HTTP server failed")?;
    info!("wagate stopped");
    Ok(())
}

/// Print the recorded status of one message.
async fn handle_status(id: &str) -> anyhow::Result<()> {
    wagate::logging::init_cli();
    let config = Config::load().context("failed to load configuration")?;
    let paths = runtime_paths(&config)?;
    let ledger = StatusLedger::open(&paths.ledger_db, ledger_options(&config))
        .await
        .with_context(|| format!("failed to open ledger at {}", paths.ledger_db.display()))?;

    match ledger.get_record(id).await? {
        Some(record) => println!(
            "{}\t{}\t{}",
            record.id,
            record.status,
            record.updated_at.to_rfc3339()
        ),
        None => println!("{id}\tUNKNOWN"),
    }
    Ok(())
}

/// Validate configuration and report where state lives.
fn handle_check() -> anyhow::Result<()> {
    wagate::logging::init_cli();
    let config = Config::load().context("configuration is invalid")?;
    let paths = runtime_paths(&config)?;

    println!("config: ok");
    println!("bind: {}", config.server.bind);
    println!("bridge: {}", config.bridge.base_url);
    println!("ledger: {}", paths.ledger_db.display());
    println!("logs: {}", paths.logs_dir.display());
    if config.auth_token(|key| std::env::var(key).ok()).is_none() {
        println!("warning: {} is not set; `start` will refuse to run", config.server.auth_token_env);
    }
    Ok(())
}
