//! Instance identifiers.
//!
//! A remote instance is named `region:project:name`. The region selects where
//! the instance runs; the server certificate only carries `project:name`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parsed `region:project:name` instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    region: String,
    project: String,
    name: String,
}

impl InstanceId {
    /// Parse an identifier with exactly three non-empty colon-separated
    /// segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split(':');
        let (Some(region), Some(project), Some(name), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidInstance(raw.to_string()));
        };
        if region.is_empty() || project.is_empty() || name.is_empty() {
            return Err(Error::InvalidInstance(raw.to_string()));
        }
        Ok(Self {
            region: region.to_string(),
            project: project.to_string(),
            name: name.to_string(),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity the remote presents in its certificate: `project:name`.
    pub fn tls_server_name(&self) -> String {
        format!("{}:{}", self.project, self.name)
    }
}

impl FromStr for InstanceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.region, self.project, self.name)
    }
}
