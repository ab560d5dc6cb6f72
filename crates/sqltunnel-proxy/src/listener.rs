//! Local TCP listener feeding the dispatcher.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::LocalConn;

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections on `listener` and forward each, tagged with
/// `instance` and `port`, to the dispatcher via `tx`.
///
/// Returns when `shutdown` fires or the dispatcher stops receiving.
pub async fn serve(
    listener: TcpListener,
    instance: String,
    port: u16,
    tx: mpsc::Sender<LocalConn<TcpStream>>,
    shutdown: CancellationToken,
) {
    let local_addr = listener.local_addr().ok();
    info!(instance = %instance, addr = ?local_addr, "Listening for local connections");

    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (conn, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(instance = %instance, error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(e) = conn.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        debug!(instance = %instance, peer = %peer, "Accepted local connection");

        let local = LocalConn {
            conn,
            instance: instance.clone(),
            port,
        };
        if tx.send(local).await.is_err() {
            debug!(instance = %instance, "Dispatcher gone, stopping listener");
            break;
        }
    }
    info!(instance = %instance, "Listener stopped");
}
