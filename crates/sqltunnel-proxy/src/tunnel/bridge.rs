//! Full-duplex relay between a local connection and a remote stream.
//!
//! A [`Tunnel`] runs two pumps on the calling task:
//!
//! - **uplink** reads chunks of at most `buffer_size` bytes from the local
//!   connection and sends each as one remote message;
//! - **downlink** receives remote messages and writes their payloads to the
//!   local connection.
//!
//! Whichever pump stops first records its reason in a capacity-one slot and
//! fires the tunnel's cancellation token. The other pump observes the token
//! at its next suspension point, tries to record (and is discarded because
//! the slot is full), and exits. The local connection is shut down exactly
//! once, by the downlink pump on its way out. [`Tunnel::run`] returns only
//! after both pumps have exited.
//!
//! A local read yields either bytes or an error, never both, so every
//! non-empty read is forwarded before the next read is issued; a zero-byte
//! read is end of stream.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::error::{Direction, Termination, TunnelError};
use super::remote::{RemoteSink, RemoteSource};

/// Bytes read from the local connection per forwarded message.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// One local connection paired with one remote stream.
pub struct Tunnel<L, S, R> {
    id: Uuid,
    local: L,
    sink: S,
    source: R,
    buffer_size: usize,
    cancel: CancellationToken,
}

impl<L, S, R> Tunnel<L, S, R>
where
    L: AsyncRead + AsyncWrite + Send,
    S: RemoteSink,
    R: RemoteSource,
{
    pub fn new(local: L, sink: S, source: R) -> Self {
        Self {
            id: Uuid::new_v4(),
            local,
            sink,
            source,
            buffer_size: DEFAULT_BUFFER_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the maximum chunk size. Zero is treated as one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Tie the tunnel's cancellation to `parent`: cancelling `parent` tears
    /// the tunnel down, while the tunnel firing its own token leaves `parent`
    /// untouched.
    #[must_use]
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Handle to the tunnel's cancellation token. Cancelling it stops the
    /// tunnel; after [`Tunnel::run`] returns it is always cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Relay bytes in both directions until either side terminates.
    ///
    /// Returns the first recorded termination. The remote stream is dropped
    /// (abandoning the RPC) and the local connection shut down before this
    /// returns.
    pub async fn run(self) -> Termination {
        let Self {
            id,
            local,
            mut sink,
            mut source,
            buffer_size,
            cancel,
        } = self;

        let (recorder, mut slot) = mpsc::channel(1);
        let shutdown = Shutdown {
            id,
            recorder,
            cancel,
            fired: AtomicBool::new(false),
        };

        let (mut reader, writer) = tokio::io::split(local);
        let mut writer = LocalWriter::new(writer);

        debug!(tunnel = %id, buffer_size, "Tunnel open");
        let (bytes_up, bytes_down) = tokio::join!(
            pump_uplink(&mut reader, &mut sink, buffer_size, &shutdown),
            pump_downlink(&mut writer, &mut source, &shutdown),
        );

        writer.close().await;
        drop(sink);
        drop(source);

        let termination = slot.try_recv().unwrap_or(Termination {
            direction: Direction::Uplink,
            was_read_error: false,
            error: TunnelError::Cancelled,
        });
        log_termination(id, &termination, bytes_up, bytes_down);
        termination
    }
}

fn log_termination(id: Uuid, termination: &Termination, bytes_up: usize, bytes_down: usize) {
    let direction = termination.direction;
    let was_read_error = termination.was_read_error;
    if termination.is_clean() {
        info!(
            tunnel = %id,
            %direction,
            bytes_up,
            bytes_down,
            "Tunnel closed by peer"
        );
    } else if matches!(termination.error, TunnelError::Cancelled) {
        info!(tunnel = %id, bytes_up, bytes_down, "Tunnel cancelled");
    } else {
        warn!(
            tunnel = %id,
            %direction,
            was_read_error,
            error = %termination.error,
            bytes_up,
            bytes_down,
            "Tunnel terminated"
        );
    }
}

/// Shared shutdown decision for the two pumps.
struct Shutdown {
    id: Uuid,
    recorder: mpsc::Sender<Termination>,
    cancel: CancellationToken,
    fired: AtomicBool,
}

impl Shutdown {
    /// Record why `direction` stopped (first caller wins, never blocks) and
    /// fire the cancellation token.
    fn finish(&self, direction: Direction, was_read_error: bool, error: TunnelError) {
        let termination = Termination {
            direction,
            was_read_error,
            error,
        };
        match self.recorder.try_send(termination) {
            Ok(()) => trace!(tunnel = %self.id, %direction, "Recorded termination"),
            Err(TrySendError::Full(t) | TrySendError::Closed(t)) => {
                trace!(tunnel = %self.id, %direction, discarded = %t.error, "Termination already recorded");
            }
        }
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }

    async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Local write half with an idempotent close.
struct LocalWriter<W> {
    inner: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> LocalWriter<W> {
    const fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(chunk).await?;
        self.inner.flush().await
    }

    /// Shut the connection down; later calls do nothing.
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.inner.shutdown().await {
            debug!(error = %e, "Local shutdown failed");
        }
    }
}

async fn pump_uplink<Rd, S>(
    reader: &mut Rd,
    sink: &mut S,
    buffer_size: usize,
    shutdown: &Shutdown,
) -> usize
where
    Rd: AsyncRead + Unpin,
    S: RemoteSink,
{
    let mut buf = vec![0u8; buffer_size];
    let mut forwarded = 0usize;
    loop {
        let read = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                shutdown.finish(Direction::Uplink, true, TunnelError::Cancelled);
                return forwarded;
            }
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => {
                shutdown.finish(Direction::Uplink, true, TunnelError::Closed);
                return forwarded;
            }
            Ok(n) => n,
            Err(e) => {
                shutdown.finish(Direction::Uplink, true, e.into());
                return forwarded;
            }
        };

        let sent = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                shutdown.finish(Direction::Uplink, false, TunnelError::Cancelled);
                return forwarded;
            }
            sent = sink.send(buf[..n].to_vec()) => sent,
        };
        if let Err(status) = sent {
            shutdown.finish(Direction::Uplink, false, status.into());
            return forwarded;
        }
        forwarded = forwarded.saturating_add(n);
    }
}

async fn pump_downlink<W, R>(
    writer: &mut LocalWriter<W>,
    source: &mut R,
    shutdown: &Shutdown,
) -> usize
where
    W: AsyncWrite + Unpin,
    R: RemoteSource,
{
    let delivered = downlink_loop(writer, source, shutdown).await;
    writer.close().await;
    delivered
}

async fn downlink_loop<W, R>(
    writer: &mut LocalWriter<W>,
    source: &mut R,
    shutdown: &Shutdown,
) -> usize
where
    W: AsyncWrite + Unpin,
    R: RemoteSource,
{
    let mut delivered = 0usize;
    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                shutdown.finish(Direction::Downlink, true, TunnelError::Cancelled);
                return delivered;
            }
            received = source.recv() => received,
        };
        let chunk = match received {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                shutdown.finish(Direction::Downlink, true, TunnelError::Closed);
                return delivered;
            }
            Err(status) => {
                shutdown.finish(Direction::Downlink, true, status.into());
                return delivered;
            }
        };

        let written = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                shutdown.finish(Direction::Downlink, false, TunnelError::Cancelled);
                return delivered;
            }
            written = writer.write_chunk(&chunk) => written,
        };
        if let Err(e) = written {
            shutdown.finish(Direction::Downlink, false, e.into());
            return delivered;
        }
        delivered = delivered.saturating_add(chunk.len());
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
