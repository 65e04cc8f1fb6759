//! Collaborators that talk to the cluster.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │          ClusterApi          │
//!            │  Directory + SlowlogTransport│
//!            └──────────────┬───────────────┘
//!                           │
//!             ┌─────────────┴─────────────┐
//!             │                           │
//!      ┌──────▼──────┐             ┌──────▼──────┐
//!      │ RestClient  │             │ MockCluster │
//!      │ (REST API)  │             │ (Testing)   │
//!      └─────────────┘             └─────────────┘
//! ```
//!
//! Every call may block on the network and may fail with a `ClusterError`.

pub mod mock;
mod rest;
pub mod slowlog;

use std::fmt;
use std::time::Duration;

use crate::model::{DatabaseDescriptor, RawEntry};

pub use mock::MockCluster;
pub use rest::RestClient;

/// Error type for collaborator calls.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterError {
    /// Request could not be sent or no response arrived.
    Request(String),
    /// The API answered with a non-success status.
    Status { status: u16, body: String },
    /// The response did not have the expected shape.
    Decode(String),
    /// Client could not be configured (TLS setup, bad endpoint).
    Config(String),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::Request(msg) => write!(f, "request failed: {}", msg),
            ClusterError::Status { status, body } => {
                write!(f, "cluster API returned {}: {}", status, body)
            }
            ClusterError::Decode(msg) => write!(f, "unexpected response: {}", msg),
            ClusterError::Config(msg) => write!(f, "client configuration: {}", msg),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            ClusterError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else if e.is_decode() {
            ClusterError::Decode(e.to_string())
        } else {
            ClusterError::Request(e.to_string())
        }
    }
}

/// Current slow-log thresholds of one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// `slowlog-log-slower-than`, microseconds.
    pub slower_than: i64,
    /// `slowlog-max-len`, entries.
    pub max_len: i64,
}

/// Database directory and per-database slow-log configuration.
pub trait Directory {
    /// Cluster label put on every envelope produced from this directory.
    fn cluster(&self) -> &str;

    fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, ClusterError>;

    fn thresholds(&self, db: &DatabaseDescriptor) -> Result<Thresholds, ClusterError>;

    fn set_slower_than(&self, db: &DatabaseDescriptor, value: i64) -> Result<(), ClusterError>;

    fn set_max_len(&self, db: &DatabaseDescriptor, value: i64) -> Result<(), ClusterError>;
}

/// Slow-log retrieval for one database.
pub trait SlowlogTransport {
    /// Returns the current snapshot of raw entries for `db`, in the order
    /// the database reports them. The first entry is the length probe.
    fn fetch_slowlog(&self, db: &DatabaseDescriptor) -> Result<Vec<RawEntry>, ClusterError>;
}

/// Both collaborators behind one handle, shareable across threads.
pub trait ClusterApi: Directory + SlowlogTransport + Send + Sync {}

impl<T: Directory + SlowlogTransport + Send + Sync> ClusterApi for T {}

/// Connection settings for the REST collaborator.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Endpoint host, without scheme or port.
    pub host: String,
    pub api_port: u16,
    pub username: String,
    pub password: String,
    pub verify_tls: bool,
    pub timeout: Duration,
}

impl ClusterConfig {
    pub const DEFAULT_API_PORT: u16 = 9443;

    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_port: Self::DEFAULT_API_PORT,
            username: username.into(),
            password: password.into(),
            verify_tls: true,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn base_url(&self) -> String {
        format!("https://{}:{}/v1", self.host, self.api_port)
    }
}
