#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the dispatch pipeline.
//!
//! Drives resolve -> connect -> bridge end to end with an in-memory echo
//! connector in place of the gRPC channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use sqltunnel_core::InstanceId;
use sqltunnel_proxy::source::{ConfigSourceError, InstanceEndpoint, TlsIdentity};
use sqltunnel_proxy::tunnel::{
    Connector, DialError, RemoteSink, RemoteSource, ResolveError, ResolvedEndpoint, SetupError,
};
use sqltunnel_proxy::{ConfigSource, Dispatcher, LocalConn};

const INSTANCE: &str = "us-central1:proj:db";

// =========================================================================
// Test collaborators
// =========================================================================

/// Knows exactly one instance.
struct SingleInstance;

#[tonic::async_trait]
impl ConfigSource for SingleInstance {
    async fn cached_config(&self, _instance: &InstanceId) -> Option<InstanceEndpoint> {
        None
    }

    async fn refresh_config(
        &self,
        instance: &InstanceId,
    ) -> Result<InstanceEndpoint, ConfigSourceError> {
        if instance.to_string() != INSTANCE {
            return Err(ConfigSourceError::UnknownInstance(instance.to_string()));
        }
        Ok(InstanceEndpoint {
            address: "10.0.0.1:3306".into(),
            tls: TlsIdentity {
                ca_cert_pem: "CA".into(),
                client: None,
                server_name: None,
            },
        })
    }
}

struct EchoSink(mpsc::Sender<Vec<u8>>);

#[tonic::async_trait]
impl RemoteSink for EchoSink {
    async fn send(&mut self, chunk: Vec<u8>) -> Result<(), Status> {
        self.0
            .send(chunk)
            .await
            .map_err(|_| Status::unavailable("echo closed"))
    }
}

struct EchoSource(mpsc::Receiver<Vec<u8>>);

#[tonic::async_trait]
impl RemoteSource for EchoSource {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, Status> {
        Ok(self.0.recv().await)
    }
}

/// Remote that sends every chunk straight back. Records dialed endpoints.
#[derive(Clone, Default)]
struct EchoConnector {
    dialed: Arc<Mutex<Vec<(String, String)>>>,
    refuse: bool,
}

#[tonic::async_trait]
impl Connector for EchoConnector {
    type Sink = EchoSink;
    type Source = EchoSource;

    async fn connect(
        &self,
        endpoint: &ResolvedEndpoint,
    ) -> Result<(Self::Sink, Self::Source), DialError> {
        if self.refuse {
            return Err(DialError::Connection("connection refused".into()));
        }
        self.dialed.lock().unwrap().push((
            endpoint.address.clone(),
            endpoint.tls_server_name.clone(),
        ));
        let (tx, rx) = mpsc::channel(8);
        Ok((EchoSink(tx), EchoSource(rx)))
    }
}

fn dispatcher(connector: EchoConnector) -> Dispatcher<EchoConnector> {
    Dispatcher::new(Arc::new(SingleInstance), connector)
}

fn local_conn(instance: &str) -> (DuplexStream, LocalConn<DuplexStream>) {
    let (peer, conn) = tokio::io::duplex(256);
    (
        peer,
        LocalConn {
            conn,
            instance: instance.into(),
            port: 3307,
        },
    )
}

async fn read_exact_timeout(peer: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), peer.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

async fn assert_closed(peer: &mut DuplexStream) {
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), peer.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "local connection should be closed");
}

// =========================================================================
// Single dispatch
// =========================================================================

#[tokio::test]
async fn tunnel_relays_bytes_both_ways() {
    let connector = EchoConnector::default();
    let dispatcher = dispatcher(connector.clone());
    let shutdown = CancellationToken::new();
    let (mut peer, conn) = local_conn(INSTANCE);

    dispatcher.dispatch(conn, &shutdown).await.unwrap();
    assert_eq!(dispatcher.active_tunnels(), 1);

    peer.write_all(b"hello ").await.unwrap();
    peer.write_all(b"world").await.unwrap();
    assert_eq!(read_exact_timeout(&mut peer, 11).await, b"hello world");

    let dialed = connector.dialed.lock().unwrap().clone();
    assert_eq!(
        dialed,
        vec![("10.0.0.1:3307".to_string(), "proj:db".to_string())]
    );
}

#[tokio::test]
async fn malformed_instance_closes_local() {
    let connector = EchoConnector::default();
    let dispatcher = dispatcher(connector.clone());
    let (mut peer, conn) = local_conn("proj:db");

    let err = dispatcher
        .dispatch(conn, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetupError::Resolve(ResolveError::MalformedInstance(_))
    ));
    assert!(connector.dialed.lock().unwrap().is_empty());
    assert_closed(&mut peer).await;
}

#[tokio::test]
async fn unknown_instance_is_a_resolve_error() {
    let dispatcher = dispatcher(EchoConnector::default());
    let (mut peer, conn) = local_conn("us-east1:proj:other");

    let err = dispatcher
        .dispatch(conn, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Resolve(ResolveError::Source(_))));
    assert_closed(&mut peer).await;
}

#[tokio::test]
async fn dial_failure_closes_local() {
    let dispatcher = dispatcher(EchoConnector {
        refuse: true,
        ..EchoConnector::default()
    });
    let (mut peer, conn) = local_conn(INSTANCE);

    let err = dispatcher
        .dispatch(conn, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::Dial(DialError::Connection(_))));
    assert_eq!(dispatcher.active_tunnels(), 0);
    assert_closed(&mut peer).await;
}

// =========================================================================
// Run loop
// =========================================================================

#[tokio::test]
async fn failed_setup_does_not_stop_later_tunnels() {
    let dispatcher = Arc::new(dispatcher(EchoConnector::default()));
    let (tx, rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(rx, shutdown).await })
    };

    let (mut bad_peer, bad) = local_conn("not-an-instance");
    let (mut good_peer, good) = local_conn(INSTANCE);
    tx.send(bad).await.unwrap();
    tx.send(good).await.unwrap();

    assert_closed(&mut bad_peer).await;
    good_peer.write_all(b"ping").await.unwrap();
    assert_eq!(read_exact_timeout(&mut good_peer, 4).await, b"ping");

    // Closing the source and the last client lets run() return.
    drop(tx);
    drop(good_peer);
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dispatcher.active_tunnels(), 0);
}

#[tokio::test]
async fn shutdown_tears_down_running_tunnels() {
    let dispatcher = Arc::new(dispatcher(EchoConnector::default()));
    let (tx, rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { dispatcher.run(rx, shutdown).await })
    };

    let (mut peer, conn) = local_conn(INSTANCE);
    tx.send(conn).await.unwrap();
    peer.write_all(b"x").await.unwrap();
    assert_eq!(read_exact_timeout(&mut peer, 1).await, b"x");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert_closed(&mut peer).await;
}
