//! sqltunnel Core Library
//!
//! Shared functionality for sqltunnel components:
//! - Configuration loading and validation
//! - Instance identifier parsing
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod instance;
pub mod tracing_init;

pub use config::{Config, InstanceConfig, ProxyConfig};
pub use error::{Error, Result};
pub use instance::InstanceId;
