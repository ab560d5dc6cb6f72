//! Endpoint resolution: instance identifier to dialable address + TLS identity.

use tracing::debug;

use sqltunnel_core::InstanceId;

use super::error::ResolveError;
use crate::source::{ConfigSource, TlsIdentity};

/// Where and how to dial one instance.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub instance: InstanceId,
    /// `host:port` with the tunnel port substituted.
    pub address: String,
    /// Name the server certificate is verified against (`project:name`).
    pub tls_server_name: String,
    /// Per-dial copy of the cached TLS material, `server_name` filled in.
    pub tls: TlsIdentity,
}

/// Resolve `instance` against `source`, targeting the tunnel service on
/// `port`.
///
/// Uses the cached entry when there is one and refreshes otherwise. Nothing
/// is retried; a refresh failure is returned as-is.
pub async fn resolve(
    instance: &str,
    port: u16,
    source: &dyn ConfigSource,
) -> Result<ResolvedEndpoint, ResolveError> {
    let instance = InstanceId::parse(instance)?;

    let published = match source.cached_config(&instance).await {
        Some(entry) => entry,
        None => {
            debug!(instance = %instance, "No cached config, refreshing");
            source.refresh_config(&instance).await?
        }
    };

    let address = with_port(&published.address, port);
    let tls_server_name = instance.tls_server_name();
    let mut tls = published.tls;
    tls.server_name = Some(tls_server_name.clone());

    debug!(
        instance = %instance,
        address = %address,
        server_name = %tls_server_name,
        "Resolved endpoint"
    );
    Ok(ResolvedEndpoint {
        instance,
        address,
        tls_server_name,
        tls,
    })
}

/// Replace everything after the first colon of `address` with `port`.
fn with_port(address: &str, port: u16) -> String {
    let host = address.split(':').next().unwrap_or(address);
    format!("{host}:{port}")
}
