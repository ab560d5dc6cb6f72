//! Secure channel factory: TLS gRPC channel to a resolved endpoint.

use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;
use tonic::codegen::http::Uri;
use tonic::transport::Channel;
use tower::service_fn;
use tracing::{debug, info};

use sqltunnel_proto::v1::ServerMessage;
use sqltunnel_proto::v1::tunnel_service_client::TunnelServiceClient;

use super::error::DialError;
use super::remote::{GrpcSink, RemoteSink, RemoteSource};
use super::resolver::ResolvedEndpoint;
use super::tls::{client_config, sni_for};

/// Messages buffered between the uplink pump and the request stream.
const OUTBOUND_QUEUE: usize = 16;

/// Channel-level dial settings.
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub connect_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(10),
        }
    }
}

impl DialOptions {
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..Self::default()
        }
    }
}

/// Open a TLS channel to `endpoint` and return a client for it. No retry.
///
/// TLS is layered on by our own connector so the server certificate can be
/// checked against the instance identity in `endpoint.tls.server_name`
/// rather than the dialed host. The channel URI is therefore plain `http`.
pub async fn dial(
    endpoint: &ResolvedEndpoint,
    options: &DialOptions,
) -> Result<TunnelServiceClient<Channel>, DialError> {
    let sni = sni_for(&endpoint.address)?;
    let tls = TlsConnector::from(Arc::new(client_config(&endpoint.tls)?));
    let address = endpoint.address.clone();
    let connector = service_fn(move |_: Uri| {
        let tls = tls.clone();
        let sni = sni.clone();
        let address = address.clone();
        async move {
            let tcp = TcpStream::connect(address.as_str()).await?;
            tcp.set_nodelay(true)?;
            let stream = tls.connect(sni, tcp).await?;
            Ok::<_, std::io::Error>(TokioIo::new(stream))
        }
    });

    let channel = Channel::from_shared(format!("http://{}", endpoint.address))
        .map_err(|e| DialError::Endpoint {
            address: endpoint.address.clone(),
            reason: e.to_string(),
        })?
        .connect_timeout(options.connect_timeout)
        .http2_keep_alive_interval(options.keep_alive_interval)
        .keep_alive_timeout(options.keep_alive_timeout)
        .connect_with_connector(connector)
        .await
        .map_err(|e| {
            debug!(error = ?e, "connection error details");
            DialError::Connection(format!("{e}: {}", error_chain(&e)))
        })?;

    info!(
        instance = %endpoint.instance,
        address = %endpoint.address,
        server_name = %endpoint.tls_server_name,
        "Secure channel established"
    );
    Ok(TunnelServiceClient::new(channel))
}

/// Start the `Connection` stream on `client`.
pub async fn open_stream(
    client: &mut TunnelServiceClient<Channel>,
) -> Result<(GrpcSink, Streaming<ServerMessage>), DialError> {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let response = client.connection(ReceiverStream::new(rx)).await?;
    Ok((GrpcSink::new(tx), response.into_inner()))
}

/// Turns a resolved endpoint into the two halves of a remote stream.
#[tonic::async_trait]
pub trait Connector: Send + Sync {
    type Sink: RemoteSink + 'static;
    type Source: RemoteSource + 'static;

    async fn connect(
        &self,
        endpoint: &ResolvedEndpoint,
    ) -> Result<(Self::Sink, Self::Source), DialError>;
}

/// [`Connector`] that dials a TLS channel per tunnel.
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector {
    options: DialOptions,
}

impl GrpcConnector {
    pub const fn new(options: DialOptions) -> Self {
        Self { options }
    }
}

#[tonic::async_trait]
impl Connector for GrpcConnector {
    type Sink = GrpcSink;
    type Source = Streaming<ServerMessage>;

    async fn connect(
        &self,
        endpoint: &ResolvedEndpoint,
    ) -> Result<(Self::Sink, Self::Source), DialError> {
        let mut client = dial(endpoint, &self.options).await?;
        open_stream(&mut client).await
    }
}

/// Walk the `source()` chain of an error and join into a single string.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(e) = current {
        chain.push(e.to_string());
        current = e.source();
    }
    if chain.is_empty() {
        String::from("(no further details)")
    } else {
        chain.join(" -> ")
    }
}
