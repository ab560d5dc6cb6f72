//! Remote halves of a tunnel: where uplink chunks go and downlink chunks
//! come from.

use tokio::sync::mpsc;
use tonic::{Status, Streaming};

use sqltunnel_proto::v1::{ClientMessage, ServerMessage};

/// Outbound half of the remote stream.
#[tonic::async_trait]
pub trait RemoteSink: Send {
    /// Send one chunk as one message.
    async fn send(&mut self, chunk: Vec<u8>) -> Result<(), Status>;
}

/// Inbound half of the remote stream.
#[tonic::async_trait]
pub trait RemoteSource: Send {
    /// Receive the next chunk. `Ok(None)` means the remote ended the stream
    /// cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, Status>;
}

/// Request side of a `Connection` call: messages pushed here are streamed
/// to the server.
pub struct GrpcSink {
    tx: mpsc::Sender<ClientMessage>,
}

impl GrpcSink {
    pub const fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self { tx }
    }
}

#[tonic::async_trait]
impl RemoteSink for GrpcSink {
    async fn send(&mut self, chunk: Vec<u8>) -> Result<(), Status> {
        self.tx
            .send(ClientMessage { data: chunk })
            .await
            .map_err(|_| Status::unavailable("request stream closed"))
    }
}

#[tonic::async_trait]
impl RemoteSource for Streaming<ServerMessage> {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, Status> {
        Ok(self.message().await?.map(|msg| msg.data))
    }
}
