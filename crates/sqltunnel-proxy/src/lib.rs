//! sqltunnel Proxy Library
//!
//! Tunnels local byte streams to remote instances over TLS gRPC:
//! - Instance endpoint resolution against a certificate/address source
//! - Secure channel setup and `Connection` stream opening
//! - Full-duplex bridge with single-winner shutdown
//! - Dispatch of accepted local connections to tunnels

pub mod dispatcher;
pub mod listener;
pub mod source;
pub mod tunnel;

pub use dispatcher::{Dispatcher, LocalConn};
pub use source::{ConfigSource, FileConfigSource};
pub use tunnel::Tunnel;
