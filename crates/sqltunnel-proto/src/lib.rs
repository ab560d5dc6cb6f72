//! sqltunnel Protocol Buffers
//!
//! Generated protobuf code for `sqltunnel.v1.TunnelService`.
//!
//! The service has a single bidirectional streaming method, `Connection`,
//! whose messages each carry one opaque chunk of the tunneled byte stream.
//! The proxy uses the client; the server side backs in-process test
//! instances.

#![allow(clippy::derive_partial_eq_without_eq)]

/// sqltunnel v1 API definitions.
pub mod v1 {
    tonic::include_proto!("sqltunnel.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;
