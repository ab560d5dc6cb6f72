//! Config source backed by the proxy's TOML configuration.
//!
//! Addresses come straight from the config file; PEM material is read from
//! disk on refresh and cached for `max_age`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use sqltunnel_core::{Config, InstanceConfig, InstanceId};

use super::{ClientIdentity, ConfigSource, ConfigSourceError, InstanceEndpoint, TlsIdentity};

/// How long refreshed TLS material is served from cache.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(55 * 60);

struct CacheEntry {
    endpoint: InstanceEndpoint,
    fetched_at: Instant,
}

/// [`ConfigSource`] that reads certificates listed in the config file.
pub struct FileConfigSource {
    instances: HashMap<String, InstanceConfig>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    max_age: Duration,
}

impl FileConfigSource {
    pub fn new(config: &Config) -> Self {
        Self::with_max_age(config, DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(config: &Config, max_age: Duration) -> Self {
        let instances = config
            .instances
            .iter()
            .map(|i| (i.id.clone(), i.clone()))
            .collect();
        Self {
            instances,
            cache: RwLock::new(HashMap::new()),
            max_age,
        }
    }
}

async fn read_pem(path: &Path) -> Result<String, ConfigSourceError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigSourceError::ReadPem {
            path: path.to_path_buf(),
            source,
        })
}

#[tonic::async_trait]
impl ConfigSource for FileConfigSource {
    async fn cached_config(&self, instance: &InstanceId) -> Option<InstanceEndpoint> {
        let cache = self.cache.read().await;
        let entry = cache.get(&instance.to_string())?;
        if entry.fetched_at.elapsed() >= self.max_age {
            return None;
        }
        Some(entry.endpoint.clone())
    }

    async fn refresh_config(
        &self,
        instance: &InstanceId,
    ) -> Result<InstanceEndpoint, ConfigSourceError> {
        let key = instance.to_string();
        let settings = self
            .instances
            .get(&key)
            .ok_or_else(|| ConfigSourceError::UnknownInstance(key.clone()))?;

        let ca_cert_pem = read_pem(&settings.ca_cert).await?;
        let client = match (&settings.client_cert, &settings.client_key) {
            (Some(cert), Some(key)) => Some(ClientIdentity {
                cert_pem: read_pem(cert).await?,
                key_pem: read_pem(key).await?,
            }),
            _ => None,
        };

        let endpoint = InstanceEndpoint {
            address: settings.address.clone(),
            tls: TlsIdentity {
                ca_cert_pem,
                client,
                server_name: None,
            },
        };

        self.cache.write().await.insert(
            key,
            CacheEntry {
                endpoint: endpoint.clone(),
                fetched_at: Instant::now(),
            },
        );
        debug!(instance = %instance, "Refreshed instance TLS material");
        Ok(endpoint)
    }
}
