// VDX Server - Network server for VDX time-series queries
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! TCP accept loop and per-connection command loop.
//!
//! Each accepted connection runs in its own task and handles its commands
//! one at a time. Dispatch runs on the blocking pool, since store queries
//! and compression block. A semaphore caps open connections; a client
//! arriving at the cap gets an `error:` line and is closed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vdx::{ProtocolError, Response, SourcePool, StoreFactory, VdxError};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, ServerError};
use crate::metrics;

/// Limits applied to every connection
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_line_bytes: usize,
    read_timeout: Option<Duration>,
}

/// The protocol server
pub struct Server {
    config: ServerConfig,
    pool: SourcePool,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Build a server over stores opened by `factory`
    pub fn new(config: ServerConfig, factory: Arc<dyn StoreFactory>) -> Result<Self> {
        config.validate()?;
        let pool = SourcePool::new(config.sources.clone(), factory);
        let dispatcher = Dispatcher::with_defaults(pool.clone(), config.compression_level);
        Ok(Self::with_dispatcher(config, pool, dispatcher))
    }

    /// Build a server with a custom command set
    pub fn with_dispatcher(config: ServerConfig, pool: SourcePool, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            pool,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Source pool shared by all connections
    pub fn pool(&self) -> &SourcePool {
        &self.pool
    }

    /// Configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|reason| ServerError::Bind { addr, reason })
    }

    /// Bind and serve until `shutdown` turns true
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` turns true
    ///
    /// On shutdown the listener stops accepting, idle connections close and
    /// busy connections finish their current command first.
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let local = listener.local_addr()?;
        let max_connections = self.config.max_connections;
        info!(
            "VDX server listening on {} ({} sources, max {} connections)",
            local,
            self.pool.sources().len(),
            max_connections
        );

        let limits = ConnectionLimits {
            max_line_bytes: self.config.max_line_bytes,
            read_timeout: self.config.read_timeout(),
        };
        let permits = Arc::new(Semaphore::new(max_connections));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        metrics::connection_rejected();
                        warn!("rejecting {}: {} connections open", peer, max_connections);
                        connections.spawn(reject(stream, max_connections));
                        continue;
                    };

                    let dispatcher = Arc::clone(&self.dispatcher);
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        metrics::connection_opened();
                        debug!("connection from {}", peer);
                        if let Err(e) = handle_connection(stream, dispatcher, limits, shutdown).await {
                            debug!("connection {} ended: {}", peer, e);
                        }
                        metrics::connection_closed();
                        drop(permit);
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("shutdown requested, draining {} connections", connections.len());
                    break;
                }
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
        self.pool.close();
        info!("VDX server stopped");
        Ok(())
    }
}

/// Resolve once `shutdown` holds `true`; never if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn reject(mut stream: TcpStream, max_connections: usize) {
    let response = Response::error(format!(
        "server busy (max {} connections)",
        max_connections
    ));
    let bytes = response.to_bytes();
    if stream.write_all(&bytes).await.is_ok() {
        metrics::add_bytes_sent(bytes.len());
    }
    let _ = stream.shutdown().await;

    // read until the peer closes, or its pending command would reset the reply
    const DRAIN_LIMIT: usize = 1 << 20;
    let drain = async {
        let mut sink = [0u8; 4096];
        let mut total = 0;
        while total < DRAIN_LIMIT {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(1), drain).await;
}

enum ReadOutcome {
    Line,
    Eof,
    TooLong,
    TimedOut,
}

async fn read_command<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limits: ConnectionLimits,
) -> io::Result<ReadOutcome>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    buf.clear();
    let mut limited = reader.take(limits.max_line_bytes as u64 + 1);
    let read = limited.read_until(b'\n', buf);
    let n = match limits.read_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, read).await {
            Ok(n) => n?,
            Err(_) => return Ok(ReadOutcome::TimedOut),
        },
        None => read.await?,
    };

    if n == 0 {
        return Ok(ReadOutcome::Eof);
    }
    let content = buf.len() - usize::from(buf.ends_with(b"\n"));
    if content > limits.max_line_bytes {
        return Ok(ReadOutcome::TooLong);
    }
    Ok(ReadOutcome::Line)
}

/// Skip the remainder of an oversized line, bounded in size and time
async fn discard_line<R>(reader: &mut R)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    const DISCARD_LIMIT: u64 = 1 << 20;
    let mut sink = Vec::new();
    let mut limited = reader.take(DISCARD_LIMIT);
    let drain = limited.read_until(b'\n', &mut sink);
    let _ = tokio::time::timeout(Duration::from_secs(1), drain).await;
}

async fn handle_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(256);

    loop {
        let outcome = tokio::select! {
            outcome = read_command(&mut reader, &mut buf, limits) => outcome?,
            _ = wait_for_shutdown(&mut shutdown) => break,
        };

        let response = match outcome {
            ReadOutcome::Eof => break,
            ReadOutcome::TimedOut => {
                debug!("closing idle connection");
                break;
            }
            ReadOutcome::TooLong => {
                metrics::record_error("protocol");
                let err = VdxError::from(ProtocolError::LineTooLong {
                    max: limits.max_line_bytes,
                });
                let bytes = Response::error(err).to_bytes();
                writer.write_all(&bytes).await?;
                metrics::add_bytes_sent(bytes.len());
                writer.shutdown().await?;
                // unread input would turn the close into a reset
                discard_line(&mut reader).await;
                break;
            }
            ReadOutcome::Line => {
                let Ok(line) = std::str::from_utf8(&buf) else {
                    metrics::record_error("protocol");
                    let bytes = Response::error("command line is not valid UTF-8").to_bytes();
                    writer.write_all(&bytes).await?;
                    metrics::add_bytes_sent(bytes.len());
                    continue;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let line = line.to_string();
                let dispatcher = Arc::clone(&dispatcher);
                match tokio::task::spawn_blocking(move || dispatcher.dispatch(&line)).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!("dispatch task failed: {}", e);
                        Response::error("internal error")
                    }
                }
            }
        };

        let bytes = response.to_bytes();
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        metrics::add_bytes_sent(bytes.len());
    }
    Ok(())
}

/// Router serving `/metrics` and `/health`
pub fn metrics_router(pool: SourcePool) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(pool)
}

/// Serve the metrics router until `shutdown` turns true
pub async fn serve_metrics(
    addr: SocketAddr,
    pool: SourcePool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|reason| ServerError::Bind {
            addr: addr.to_string(),
            reason,
        })?;
    info!("Metrics endpoint: http://{}/metrics", addr);
    axum::serve(listener, metrics_router(pool))
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
        .await?;
    Ok(())
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(pool): State<SourcePool>) -> impl IntoResponse {
    metrics::update_pool_metrics(&pool.stats());
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        metrics::encode_metrics(),
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
