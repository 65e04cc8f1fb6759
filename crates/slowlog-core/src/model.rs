//! Data model shared by the poller, the normalizer and the collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One database (shard group) within a cluster.
///
/// Fetched fresh on every cycle; topology may change between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub uid: String,
    pub name: String,
}

impl DatabaseDescriptor {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
        }
    }
}

/// Envelope identifying where an entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowlogSource {
    pub cluster: String,
    pub db: String,
    pub slowlog_id: String,
}

impl SlowlogSource {
    pub fn new(
        cluster: impl Into<String>,
        db: impl Into<String>,
        slowlog_id: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            db: db.into(),
            slowlog_id: slowlog_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
}

/// Entry as returned by the transport, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub source: SlowlogSource,
    pub metric: Metric,
}

impl RawEntry {
    pub fn new(source: SlowlogSource, name: impl Into<String>, value: f64) -> Self {
        Self {
            source,
            metric: Metric {
                name: name.into(),
                value,
            },
        }
    }
}

/// Why an event was not recorded as a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum EventError {
    /// Entry was retrieved but its metric name is not part of the telemetry contract.
    Unrecognized(Metric),
    /// The transport or directory failed for this database.
    Transport(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Unrecognized(m) => write!(f, "unrecognized metric {}={}", m.name, m.value),
            EventError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// A classified slow-log record.
#[derive(Debug, Clone, PartialEq)]
pub enum SlowlogEvent {
    Sample { source: SlowlogSource, metric: Metric },
    Error { source: SlowlogSource, error: EventError },
}

impl SlowlogEvent {
    pub fn source(&self) -> &SlowlogSource {
        match self {
            SlowlogEvent::Sample { source, .. } | SlowlogEvent::Error { source, .. } => source,
        }
    }

    /// The metric carried by the record, if the transport delivered one.
    pub fn metric(&self) -> Option<&Metric> {
        match self {
            SlowlogEvent::Sample { metric, .. } => Some(metric),
            SlowlogEvent::Error {
                error: EventError::Unrecognized(metric),
                ..
            } => Some(metric),
            SlowlogEvent::Error { .. } => None,
        }
    }

    pub fn is_sample(&self) -> bool {
        matches!(self, SlowlogEvent::Sample { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_entry_json_shape() {
        let entry = RawEntry::new(SlowlogSource::new("c1", "db-1", "len"), "slowlog_count", 3.0);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["source"]["cluster"], "c1");
        assert_eq!(json["source"]["db"], "db-1");
        assert_eq!(json["source"]["slowlog_id"], "len");
        assert_eq!(json["metric"]["name"], "slowlog_count");
        assert_eq!(json["metric"]["value"], 3.0);
    }

    #[test]
    fn transport_error_has_no_metric() {
        let event = SlowlogEvent::Error {
            source: SlowlogSource::new("c1", "db-1", ""),
            error: EventError::Transport("connection refused".to_string()),
        };
        assert!(event.metric().is_none());
        assert!(!event.is_sample());
        assert_eq!(event.source().db, "db-1");
    }
}
