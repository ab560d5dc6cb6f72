//! Tunnel between a local byte connection and a remote gRPC stream.
//!
//! Endpoint resolution, secure channel setup, and the duplex bridge that
//! relays bytes until either side terminates.

pub mod bridge;
pub mod dialer;
pub mod error;
pub mod remote;
pub mod resolver;
pub mod tls;

pub use bridge::Tunnel;
pub use dialer::{Connector, DialOptions, GrpcConnector, dial, open_stream};
pub use error::{DialError, Direction, ResolveError, SetupError, Termination, TunnelError};
pub use remote::{GrpcSink, RemoteSink, RemoteSource};
pub use resolver::{ResolvedEndpoint, resolve};
pub use tls::InstanceVerifier;
