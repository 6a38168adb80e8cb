//! Conductor RPC Server - headless control surface for the service supervisor.
//!
//! Loads the conductor configuration, starts the health monitor, and serves
//! JSON-RPC 2.0 on `/rpc`. Ctrl-C runs the full shutdown sequence so no
//! managed process outlives the server.

mod handler;
mod logs;
mod server;
mod wrapper;

use anyhow::Result;
use clap::Parser;
use conductor_core::config::AppConfig;
use conductor_core::{platform, Conductor, ConductorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "conductor-rpc")]
#[command(about = "JSON-RPC control surface for the conductor service supervisor")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Config file (defaults to conductor.json in the data directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start all services once the server is up
    #[arg(long)]
    start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!(
        "Starting Conductor RPC Server v{} ({})",
        env!("CARGO_PKG_VERSION"),
        platform::current_platform()
    );

    let config_path = args
        .config
        .unwrap_or_else(|| platform::default_base_dir().join(AppConfig::CONFIG_FILE_NAME));
    let config = ConductorConfig::load(&config_path)?;
    info!("Base directory: {}", config.base_dir.display());

    let conductor = Arc::new(Conductor::new(config)?);
    conductor.start_monitor();

    let addr = server::start_server(conductor.clone(), &args.host, args.port).await?;

    // Read by the parent process to find the server.
    println!("RPC_PORT={}", addr.port());
    info!("RPC server running on {}", addr);

    if args.start {
        conductor.request_start();
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping services");
    conductor.shutdown().await;

    Ok(())
}
