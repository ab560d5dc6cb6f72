//! Connection dispatcher: resolve, connect and bridge each accepted local
//! connection.
//!
//! Connections are set up one at a time in arrival order. Each established
//! tunnel then runs in its own task, so a failing tunnel never affects the
//! others. Setup failures are logged and the local connection is shut down;
//! nothing is retried.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::source::ConfigSource;
use crate::tunnel::bridge::DEFAULT_BUFFER_SIZE;
use crate::tunnel::{Connector, SetupError, Tunnel, resolve};

/// An accepted local connection and the instance it should reach.
#[derive(Debug)]
pub struct LocalConn<L> {
    pub conn: L,
    /// `region:project:name` identifier.
    pub instance: String,
    /// Port of the remote tunnel service.
    pub port: u16,
}

/// Hands local connections to tunnels.
pub struct Dispatcher<C> {
    source: Arc<dyn ConfigSource>,
    connector: C,
    buffer_size: usize,
    tunnels: TaskTracker,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(source: Arc<dyn ConfigSource>, connector: C) -> Self {
        Self {
            source,
            connector,
            buffer_size: DEFAULT_BUFFER_SIZE,
            tunnels: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Number of tunnels currently running.
    pub fn active_tunnels(&self) -> usize {
        self.tunnels.len()
    }

    /// Consume `incoming` until it closes or `shutdown` fires, then wait for
    /// every running tunnel to finish. Cancelling `shutdown` also cancels
    /// the running tunnels.
    pub async fn run<L>(
        &self,
        mut incoming: mpsc::Receiver<LocalConn<L>>,
        shutdown: CancellationToken,
    ) where
        L: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Dispatcher shutting down");
                    break;
                }
                next = incoming.recv() => next,
            };
            let Some(conn) = next else {
                debug!("Connection source closed");
                break;
            };
            // Setup failures are already logged; keep serving.
            let _ = self.dispatch(conn, &shutdown).await;
        }

        self.tunnels.close();
        self.tunnels.wait().await;
        info!("All tunnels closed");
    }

    /// Resolve and connect `conn`, then start its tunnel in the background.
    ///
    /// Returns the tunnel id, or the setup error after closing the local
    /// connection.
    pub async fn dispatch<L>(
        &self,
        conn: LocalConn<L>,
        shutdown: &CancellationToken,
    ) -> Result<Uuid, SetupError>
    where
        L: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let LocalConn {
            conn: mut local,
            instance,
            port,
        } = conn;

        let (sink, source) = match self.setup(&instance, port).await {
            Ok(halves) => halves,
            Err(e) => {
                error!(instance = %instance, error = %e, "Failed to set up tunnel");
                if let Err(close_err) = local.shutdown().await {
                    debug!(error = %close_err, "Local shutdown after setup failure");
                }
                return Err(e);
            }
        };

        let tunnel = Tunnel::new(local, sink, source)
            .buffer_size(self.buffer_size)
            .with_parent(shutdown);
        let id = tunnel.id();
        info!(tunnel = %id, instance = %instance, "Tunnel started");
        self.tunnels.spawn(async move {
            tunnel.run().await;
        });
        Ok(id)
    }

    async fn setup(
        &self,
        instance: &str,
        port: u16,
    ) -> Result<(C::Sink, C::Source), SetupError> {
        let endpoint = resolve(instance, port, self.source.as_ref()).await?;
        let halves = self.connector.connect(&endpoint).await?;
        Ok(halves)
    }
}
