//! Tunnel error types.

use std::fmt;

use crate::source::ConfigSourceError;

/// Errors turning an instance identifier into a dialable endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Malformed instance identifier: {0}")]
    MalformedInstance(#[from] sqltunnel_core::Error),

    #[error("Config source error: {0}")]
    Source(#[from] ConfigSourceError),
}

/// Errors establishing the secure channel or opening the stream.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("Invalid endpoint {address}: {reason}")]
    Endpoint { address: String, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Stream open failed: {0}")]
    Stream(#[from] tonic::Status),
}

/// Errors that prevent a tunnel from starting.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Dial(#[from] DialError),
}

/// Errors that terminate a running tunnel.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The peer ended its side without error.
    #[error("end of stream")]
    Closed,

    /// The tunnel was cancelled from outside before either side failed.
    #[error("tunnel cancelled")]
    Cancelled,

    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("remote stream error: {0}")]
    Remote(#[from] tonic::Status),
}

/// Copy direction of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local connection to remote stream.
    Uplink,
    /// Remote stream to local connection.
    Downlink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uplink => f.write_str("local->remote"),
            Self::Downlink => f.write_str("remote->local"),
        }
    }
}

/// The first terminal condition recorded for a tunnel.
#[derive(Debug)]
pub struct Termination {
    /// Pump that recorded the condition.
    pub direction: Direction,
    /// `true` if the pump's source side (local read or remote receive) ended
    /// it, `false` for a failure on its sink side.
    pub was_read_error: bool,
    pub error: TunnelError,
}

impl Termination {
    /// Peer closed its side cleanly.
    pub fn is_clean(&self) -> bool {
        self.was_read_error && matches!(self.error, TunnelError::Closed)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.was_read_error { "read" } else { "write" };
        write!(f, "{} {side}: {}", self.direction, self.error)
    }
}
