//! Classification of raw slow-log entries.
//!
//! Only `slowlog_count` is a telemetry sample. Everything else the transport
//! returns (individual slow-log entries included) is kept as an error event
//! with its full source context so callers can log it.

use crate::model::{EventError, RawEntry, SlowlogEvent, SlowlogSource};

/// Metric name of the per-database slow-log length sample.
pub const SLOWLOG_COUNT: &str = "slowlog_count";

pub fn normalize(entry: RawEntry) -> SlowlogEvent {
    let RawEntry { source, metric } = entry;
    if metric.name == SLOWLOG_COUNT {
        SlowlogEvent::Sample { source, metric }
    } else {
        SlowlogEvent::Error {
            source,
            error: EventError::Unrecognized(metric),
        }
    }
}

/// Error event for a database whose slow-log could not be fetched.
pub fn transport_error(cluster: &str, db: &str, message: impl Into<String>) -> SlowlogEvent {
    SlowlogEvent::Error {
        source: SlowlogSource::new(cluster, db, ""),
        error: EventError::Transport(message.into()),
    }
}
