//! Server records and the sources that yield them.
//!
//! A [`ServerSource`] hands the populator an already resolved list of
//! [`ServerRecord`]s. The HTTP client that talks to the gridscale API lives
//! outside this crate; [`JsonServerSource`] decodes the body that client
//! returns, which is also the format used by the test fixtures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// A virtual server as returned by the gridscale API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ServerPayload", into = "ServerPayload")]
pub struct ServerRecord {
    /// Object UUID
    pub uuid: String,
    /// Server name
    pub name: String,
    /// Location name (e.g. `de/fra`)
    pub location_name: String,
    /// Labels attached to the server
    pub labels: Vec<String>,
    /// Power/provisioning status (e.g. `active`)
    pub status: String,
    /// Public IPs in the order the API lists them
    pub public_ip_list: Vec<String>,
}

impl ServerRecord {
    /// Create a server with no labels and no public IPs
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        location_name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            location_name: location_name.into(),
            labels: Vec::new(),
            status: status.into(),
            public_ip_list: Vec::new(),
        }
    }

    /// Attach a public IP
    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip_list.push(ip.into());
        self
    }

    /// Attach a label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Address used to reach the server: first public IP, else its name
    pub fn address(&self) -> &str {
        self.public_ip_list
            .first()
            .map(String::as_str)
            .unwrap_or(&self.name)
    }
}

impl fmt::Display for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {}, {})", self.name, self.uuid, self.location_name, self.status)
    }
}

// Wire shape: `relations.public_ips` is a list of objects with an `ip` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerPayload {
    #[serde(alias = "uuid")]
    object_uuid: String,
    name: String,
    location_name: String,
    #[serde(default)]
    labels: Vec<String>,
    status: String,
    #[serde(default)]
    relations: ServerRelations,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServerRelations {
    #[serde(default)]
    public_ips: Vec<PublicIpRelation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PublicIpRelation {
    ip: String,
}

impl From<ServerPayload> for ServerRecord {
    fn from(payload: ServerPayload) -> Self {
        Self {
            uuid: payload.object_uuid,
            name: payload.name,
            location_name: payload.location_name,
            labels: payload.labels,
            status: payload.status,
            public_ip_list: payload
                .relations
                .public_ips
                .into_iter()
                .map(|relation| relation.ip)
                .collect(),
        }
    }
}

impl From<ServerRecord> for ServerPayload {
    fn from(record: ServerRecord) -> Self {
        Self {
            object_uuid: record.uuid,
            name: record.name,
            location_name: record.location_name,
            labels: record.labels,
            status: record.status,
            relations: ServerRelations {
                public_ips: record
                    .public_ip_list
                    .into_iter()
                    .map(|ip| PublicIpRelation { ip })
                    .collect(),
            },
        }
    }
}

/// Yields the raw server list for one inventory run.
pub trait ServerSource: fmt::Debug {
    /// Fetch all servers visible to the configured credentials
    fn fetch_servers(&self) -> Result<Vec<ServerRecord>>;
}

/// A fixed, in-memory server list.
#[derive(Debug, Clone, Default)]
pub struct StaticServerSource {
    servers: Vec<ServerRecord>,
}

impl StaticServerSource {
    /// Create a source that always returns `servers`
    pub fn new(servers: Vec<ServerRecord>) -> Self {
        Self { servers }
    }
}

impl ServerSource for StaticServerSource {
    fn fetch_servers(&self) -> Result<Vec<ServerRecord>> {
        Ok(self.servers.clone())
    }
}

/// Decodes a `GET /objects/servers` response body.
///
/// The body is `{"servers": {"<uuid>": {...}, ...}}`; servers are returned in
/// document order.
#[derive(Debug, Clone)]
pub struct JsonServerSource {
    body: String,
}

#[derive(Deserialize)]
struct ServersResponse {
    #[serde(default)]
    servers: indexmap::IndexMap<String, ServerRecord>,
}

impl JsonServerSource {
    /// Wrap a response body
    pub fn from_body(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// Read a response body from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| {
            Error::source_failed(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Ok(Self::from_body(body))
    }

    /// Decode a response body into server records
    pub fn decode(body: &str) -> Result<Vec<ServerRecord>> {
        let response: ServersResponse = serde_json::from_str(body)
            .map_err(|e| Error::source_failed(format!("invalid servers response: {}", e)))?;
        Ok(response.servers.into_values().collect())
    }
}

impl ServerSource for JsonServerSource {
    fn fetch_servers(&self) -> Result<Vec<ServerRecord>> {
        Self::decode(&self.body)
    }
}
