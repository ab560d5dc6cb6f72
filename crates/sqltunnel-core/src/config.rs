//! Configuration loading for sqltunnel.
//!
//! The proxy reads a TOML file with a `[proxy]` section and one
//! `[[instances]]` entry per tunneled instance:
//!
//! ```toml
//! [proxy]
//! grpc_port = 3307
//!
//! [[instances]]
//! id = "us-central1:my-project:my-instance"
//! listen = "127.0.0.1:5432"
//! address = "10.1.2.3:3307"
//! ca_cert = "/etc/sqltunnel/server-ca.pem"
//! ```
//!
//! CLI flags override file values; see the proxy binary.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::instance::InstanceId;

/// Complete sqltunnel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// Proxy-wide tunnel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Port of the remote gRPC tunnel endpoint. Replaces the port of the
    /// cached instance address.
    pub grpc_port: u16,
    /// Maximum bytes read from a local connection per forwarded message.
    pub buffer_size: usize,
    /// Timeout for establishing the secure channel.
    pub connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            grpc_port: 3307,
            buffer_size: 1024,
            connect_timeout_secs: 10,
        }
    }
}

/// One tunneled instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// `region:project:name` identifier.
    pub id: String,
    /// Local address accepting client connections for this instance.
    pub listen: SocketAddr,
    /// Remote `host:port` as published for the instance.
    pub address: String,
    /// PEM CA certificate that signs the instance's server certificate.
    pub ca_cert: PathBuf,
    /// PEM client certificate for mutual TLS.
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`.
    #[serde(default)]
    pub client_key: Option<PathBuf>,
}

impl Config {
    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.proxy.buffer_size == 0 {
            return Err(Error::Config("proxy.buffer_size must be positive".into()));
        }
        let mut seen_ids = HashSet::new();
        let mut seen_listen = HashSet::new();
        for instance in &self.instances {
            InstanceId::parse(&instance.id)?;
            if !seen_ids.insert(instance.id.as_str()) {
                return Err(Error::Config(format!(
                    "instance {} is configured more than once",
                    instance.id
                )));
            }
            if !seen_listen.insert(instance.listen) {
                return Err(Error::Config(format!(
                    "listen address {} is used by more than one instance",
                    instance.listen
                )));
            }
            if instance.client_cert.is_some() != instance.client_key.is_some() {
                return Err(Error::Config(format!(
                    "instance {}: client_cert and client_key must be set together",
                    instance.id
                )));
            }
        }
        Ok(())
    }

    /// Look up an instance entry by identifier.
    pub fn instance(&self, id: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.id == id)
    }
}

/// Default config file location (`<config dir>/sqltunnel/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqltunnel").join("config.toml"))
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let config = parse_config(&content)?;
    debug!(
        path = %path.display(),
        instances = config.instances.len(),
        "Loaded config"
    );
    Ok(config)
}

/// Parse and validate config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}
