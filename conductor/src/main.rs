//! Main entry point for the conductor binary
//!
//! Wires the real service implementations together with dependency
//! injection and runs the daemon event loop until shutdown.

use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use conductor::{
    services::{RealAuthenticator, RealConfigSource, RealHealthMonitor, RealMessageBus, RealSupervisor},
    traits::ConfigSource,
    ConductorError, ConductorResult, Daemon,
};
use shared::{logging, process_warn, ProcessId};

/// Conductor daemon for local process supervision and message routing
#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Supervises local processes, routes messages, and aggregates health")]
pub struct Args {
    /// Network transport bind address
    #[arg(long, default_value = "127.0.0.1:7600")]
    pub bus_addr: String,

    /// Local transport socket path
    #[arg(long, default_value = "/tmp/conductor.sock")]
    pub socket_path: String,

    /// Shared token required from network clients (open mode when unset)
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> ConductorResult<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize process ID singleton for the daemon
    ProcessId::init_daemon();

    // Initialize tracing with the requested log level
    shared::logging::init_tracing_with_level(Some(&args.log_level));

    // Initialize services
    let config = RealConfigSource::new();
    let token = match args.auth_token.clone() {
        Some(token) => Some(token),
        None => config.get("auth_token").await,
    };

    let authenticator = RealAuthenticator::new(token);
    if authenticator.is_open() {
        process_warn!(
            ProcessId::current(),
            "🔓 No auth token configured: accepting any network client"
        );
    }

    let bus = RealMessageBus::new(Arc::new(authenticator));
    let supervisor = RealSupervisor::new();
    let health = RealHealthMonitor::new();

    // Create daemon with dependency injection
    let mut daemon = Daemon::new(bus, config, health, supervisor);

    // Configure bind address
    let bus_addr: SocketAddr = args
        .bus_addr
        .parse()
        .map_err(|e| ConductorError::config(format!("Invalid bus address: {}", e)))?;

    daemon.initialize(bus_addr, Path::new(&args.socket_path)).await?;

    // Set up graceful shutdown
    let shutdown_sender = daemon.get_shutdown_sender();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal");
                let _ = shutdown_sender.send(()).await;
            }
            Err(err) => {
                logging::log_error(ProcessId::current(), "Signal handling", &err);
            }
        }
    });

    // Run main event loop
    daemon.run().await?;

    logging::log_success(ProcessId::current(), "Conductor stopped gracefully");
    Ok(())
}
