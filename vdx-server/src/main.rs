// VDX Server - Network server for VDX time-series queries
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # VDX Server
//!
//! ## Usage
//!
//! ```bash
//! # Run with a configuration file
//! vdx-server --config vdx.json
//!
//! # Override the port and expose metrics
//! vdx-server --config vdx.json --port 16051 --metrics-port 9100
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;
use vdx_server::{serve_metrics, CsvStoreFactory, Result, Server, ServerConfig};

/// VDX time-series query server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Protocol port, overrides the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Connection cap, overrides the configuration
    #[arg(long)]
    max_connections: Option<usize>,

    /// Prometheus endpoint port, overrides the configuration
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("VDX Server v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("vdx-server: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => {
            info!("No configuration file given, serving no sources");
            ServerConfig::default()
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if args.metrics_port.is_some() {
        config.metrics_port = args.metrics_port;
    }
    config.validate()?;

    info!("Store prefix: {}", config.store.prefix.display());
    let factory = Arc::new(CsvStoreFactory::new(config.store.prefix.clone()));
    let metrics_port = config.metrics_port;
    let server = Server::new(config, factory)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(port) = metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let pool = server.pool().clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, pool, shutdown).await {
                error!("metrics endpoint failed: {}", e);
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("cannot listen for Ctrl-C: {}", e),
        }
    });

    server.run(shutdown_rx).await
}
