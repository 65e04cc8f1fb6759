//! slowlog-core - slow-log telemetry for clustered databases.
//!
//! Provides:
//! - `model`: database descriptors, raw slow-log entries, classified events
//! - `filter`: operator allowlist over database uids and names
//! - `normalize`: classification of raw entries into samples and errors
//! - `cluster`: directory/transport collaborator traits, REST client, in-memory fake
//! - `poller`: lazy per-cycle slow-log sequence across all included databases
//! - `telemetry`: one polling cycle: fetch, filter, normalize, record
//! - `registry`: thread-safe metric registry with text exposition
//! - `thresholds`: read and apply per-database slow-log thresholds

pub mod cluster;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod poller;
pub mod registry;
pub mod telemetry;
pub mod thresholds;

pub use cluster::{ClusterApi, ClusterConfig, ClusterError, Directory, RestClient, SlowlogTransport};
pub use filter::DatabaseFilter;
pub use model::{DatabaseDescriptor, EventError, Metric, RawEntry, SlowlogEvent, SlowlogSource};
pub use poller::{SlowlogPoll, poll};
pub use registry::{MetricRegistry, RegistryError};
pub use telemetry::{PollCycleResult, TelemetryPoller};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
