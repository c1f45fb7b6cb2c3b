//! tidekv server entry point.
//!
//! Parses the command line, installs logging, and runs the accept loop until
//! Ctrl+C.

use anyhow::Context;
use std::sync::Arc;
use tidekv::blocking::BlockingCoordinator;
use tidekv::commands::CommandHandler;
use tidekv::config::{self, Config, Invocation};
use tidekv::connection::{handle_connection, ConnectionStats};
use tidekv::storage::StorageEngine;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            print!("{}", config::usage());
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("tidekv version {}", tidekv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {e}\n");
            eprint!("{}", config::usage());
            std::process::exit(1);
        }
    };

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log filter '{}'", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let storage = Arc::new(StorageEngine::new());
    let coordinator = Arc::new(BlockingCoordinator::new(storage));
    let commands = CommandHandler::new(coordinator);
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(version = tidekv::VERSION, address = %config.bind_address(), "tidekv listening");

    tokio::select! {
        _ = accept_loop(listener, commands, Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            info!("shutdown signal received");
        }
    }

    info!(
        connections = stats.connections_accepted.load(std::sync::atomic::Ordering::Relaxed),
        commands = stats.commands_processed.load(std::sync::atomic::Ordering::Relaxed),
        "server stopped"
    );
    Ok(())
}

/// Accepts connections forever, one task per client.
async fn accept_loop(listener: TcpListener, commands: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(client = %addr, error = %e, "failed to set TCP_NODELAY");
                }
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    commands.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => error!(error = %e, "failed to accept connection"),
        }
    }
}
