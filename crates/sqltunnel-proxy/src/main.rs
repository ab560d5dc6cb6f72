//! sqltunnel Proxy
//!
//! Listens on a local address per configured instance and tunnels every
//! accepted connection to the instance over a TLS gRPC stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sqltunnel_core::config::{default_config_path, load_config};
use sqltunnel_proxy::tunnel::{DialOptions, GrpcConnector};
use sqltunnel_proxy::{Dispatcher, FileConfigSource, listener};

/// Accepted connections waiting for the dispatcher.
const INCOMING_QUEUE: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "sqltunnel-proxy")]
#[command(version, about = "Tunnel local connections to remote instances over TLS gRPC")]
struct Args {
    /// Config file path (defaults to `<config dir>/sqltunnel/config.toml`).
    #[arg(long, env = "SQLTUNNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Port of the remote tunnel service; overrides `proxy.grpc_port`.
    #[arg(long, env = "SQLTUNNEL_GRPC_PORT")]
    grpc_port: Option<u16>,

    /// Bytes read per forwarded message; overrides `proxy.buffer_size`.
    #[arg(long, env = "SQLTUNNEL_BUFFER_SIZE")]
    buffer_size: Option<usize>,

    /// Secure channel connect timeout in seconds; overrides `proxy.connect_timeout_secs`.
    #[arg(long, env = "SQLTUNNEL_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "SQLTUNNEL_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SQLTUNNEL_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    sqltunnel_core::tracing_init::init_tracing(
        &sqltunnel_core::tracing_init::default_filter(&args.log_level),
        args.log_json,
    );
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?,
    };
    let mut config = load_config(&config_path)?;
    if let Some(port) = args.grpc_port {
        config.proxy.grpc_port = port;
    }
    if let Some(size) = args.buffer_size {
        config.proxy.buffer_size = size;
    }
    if let Some(secs) = args.connect_timeout {
        config.proxy.connect_timeout_secs = secs;
    }
    config.validate()?;
    if config.instances.is_empty() {
        anyhow::bail!("No instances configured in {}", config_path.display());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        instances = config.instances.len(),
        grpc_port = config.proxy.grpc_port,
        "Starting sqltunnel-proxy"
    );

    let source = Arc::new(FileConfigSource::new(&config));
    let connector = GrpcConnector::new(DialOptions::with_connect_timeout(Duration::from_secs(
        config.proxy.connect_timeout_secs,
    )));
    let dispatcher =
        Dispatcher::new(source, connector).with_buffer_size(config.proxy.buffer_size);

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(INCOMING_QUEUE);

    let mut listeners = Vec::with_capacity(config.instances.len());
    for instance in &config.instances {
        let bound = TcpListener::bind(instance.listen).await.map_err(|e| {
            anyhow::anyhow!("Failed to bind {} for {}: {e}", instance.listen, instance.id)
        })?;
        listeners.push(tokio::spawn(listener::serve(
            bound,
            instance.id.clone(),
            config.proxy.grpc_port,
            tx.clone(),
            shutdown.clone(),
        )));
    }
    drop(tx);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
        signal_shutdown.cancel();
    });

    dispatcher.run(rx, shutdown.clone()).await;

    shutdown.cancel();
    for handle in listeners {
        let _ = handle.await;
    }

    info!("Proxy stopped");
    Ok(())
}
