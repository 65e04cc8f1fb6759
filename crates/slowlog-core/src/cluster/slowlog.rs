//! Decoding of command responses into raw slow-log entries.
//!
//! Commands answer `{"response": <value>}`. `SLOWLOG LEN` answers a number,
//! `SLOWLOG GET` a list of `[id, timestamp, duration_us, [args..], ..]`.

use serde_json::Value;
use tracing::warn;

use super::ClusterError;
use crate::model::{RawEntry, SlowlogSource};
use crate::normalize::SLOWLOG_COUNT;

/// `slowlog_id` of the length-probe entry.
pub const LEN_SLOWLOG_ID: &str = "len";

/// Metric name given to individual slow-log entries (duration in microseconds).
pub const SLOWLOG_DURATION: &str = "slowlog_duration_us";

pub const SLOWER_THAN_PARAM: &str = "slowlog-log-slower-than";
pub const MAX_LEN_PARAM: &str = "slowlog-max-len";

/// Extracts the `response` field of a command result.
pub fn response_of(body: &Value) -> Result<&Value, ClusterError> {
    body.get("response")
        .ok_or_else(|| ClusterError::Decode(format!("missing \"response\" in {}", body)))
}

/// Builds the `slowlog_count` entry from a `SLOWLOG LEN` result.
pub fn len_entry(cluster: &str, db: &str, body: &Value) -> Result<RawEntry, ClusterError> {
    let response = response_of(body)?;
    let len = as_number(response)
        .ok_or_else(|| ClusterError::Decode(format!("SLOWLOG LEN is not a number: {}", response)))?;
    Ok(RawEntry::new(
        SlowlogSource::new(cluster, db, LEN_SLOWLOG_ID),
        SLOWLOG_COUNT,
        len,
    ))
}

/// Builds one entry per slow-log record from a `SLOWLOG GET` result.
///
/// Records without an id or a duration are skipped.
pub fn list_entries(cluster: &str, db: &str, body: &Value) -> Result<Vec<RawEntry>, ClusterError> {
    let response = response_of(body)?;
    let Some(records) = response.as_array() else {
        return Err(ClusterError::Decode(format!(
            "SLOWLOG GET is not a list: {}",
            response
        )));
    };

    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let fields = record.as_array();
        let id = fields.and_then(|f| f.first()).and_then(as_id);
        let duration = fields.and_then(|f| f.get(2)).and_then(as_number);
        match (id, duration) {
            (Some(id), Some(duration)) => entries.push(RawEntry::new(
                SlowlogSource::new(cluster, db, id),
                SLOWLOG_DURATION,
                duration,
            )),
            _ => warn!(cluster, db, record = %record, "skipping malformed slowlog record"),
        }
    }
    Ok(entries)
}

/// Runs the length probe then, when the slow-log is not empty, lists it.
///
/// `command` sends one `SLOWLOG` subcommand to `db` and returns the raw
/// result body. A failing list call fails the whole fetch.
pub fn fetch<F>(cluster: &str, db: &str, mut command: F) -> Result<Vec<RawEntry>, ClusterError>
where
    F: FnMut(&str, &[String]) -> Result<Value, ClusterError>,
{
    let len_body = command("SLOWLOG", &["LEN".to_string()])?;
    let count = len_entry(cluster, db, &len_body)?;
    let len = count.metric.value as u64;

    let mut entries = vec![count];
    if len > 0 {
        let get_body = command("SLOWLOG", &["GET".to_string(), len.to_string()])?;
        entries.extend(list_entries(cluster, db, &get_body)?);
    }
    Ok(entries)
}

/// Reads an integer setting from a `CONFIG GET <param>` result.
///
/// Accepts `[param, value]`, `{param: value}` or a bare value.
pub fn config_value(param: &str, body: &Value) -> Result<i64, ClusterError> {
    let response = response_of(body)?;
    let value = match response {
        Value::Array(items) => items
            .chunks(2)
            .find(|pair| pair.first().and_then(Value::as_str) == Some(param))
            .and_then(|pair| pair.get(1)),
        Value::Object(map) => map.get(param),
        other => Some(other),
    };
    value
        .and_then(as_number)
        .map(|v| v as i64)
        .ok_or_else(|| ClusterError::Decode(format!("CONFIG GET {}: {}", param, response)))
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_id(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
