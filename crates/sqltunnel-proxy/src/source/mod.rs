//! Source of instance addresses and TLS material.
//!
//! The resolver asks a [`ConfigSource`] for the cached entry of an instance
//! and falls back to a refresh when none is cached (or it went stale). The
//! source owns the canonical entries; callers receive clones.

pub mod file;

use std::fmt;
use std::path::PathBuf;

use sqltunnel_core::InstanceId;

pub use file::FileConfigSource;

/// PEM client certificate and key for mutual TLS.
#[derive(Clone)]
pub struct ClientIdentity {
    pub cert_pem: String,
    pub key_pem: String,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// TLS material for dialing one instance.
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    /// PEM CA certificate used to verify the server.
    pub ca_cert_pem: String,
    /// Client certificate for mutual TLS, if the instance requires one.
    pub client: Option<ClientIdentity>,
    /// Name the server certificate must match. Set per dial by the resolver.
    pub server_name: Option<String>,
}

/// Address and TLS material published for an instance.
#[derive(Debug, Clone)]
pub struct InstanceEndpoint {
    /// `host:port` as published; the resolver replaces the port.
    pub address: String,
    pub tls: TlsIdentity,
}

/// Errors from looking up or refreshing an instance.
#[derive(Debug, thiserror::Error)]
pub enum ConfigSourceError {
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("Failed to read {}: {source}", .path.display())]
    ReadPem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Cache and refresh collaborator for instance endpoints.
///
/// Both calls may block on I/O. `refresh_config` must be idempotent and safe
/// to call concurrently from several tunnels.
#[tonic::async_trait]
pub trait ConfigSource: Send + Sync {
    /// Return the cached entry, or `None` if absent or stale.
    async fn cached_config(&self, instance: &InstanceId) -> Option<InstanceEndpoint>;

    /// Fetch a fresh entry and update the cache.
    async fn refresh_config(
        &self,
        instance: &InstanceId,
    ) -> Result<InstanceEndpoint, ConfigSourceError>;
}
