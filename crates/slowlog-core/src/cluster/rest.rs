//! Cluster management REST API client.

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::slowlog::{self, MAX_LEN_PARAM, SLOWER_THAN_PARAM};
use super::{ClusterConfig, ClusterError, Directory, SlowlogTransport, Thresholds};
use crate::model::{DatabaseDescriptor, RawEntry};

/// Blocking client for the cluster REST API.
///
/// Must be created (and finally dropped) outside of an async runtime; use it
/// from `spawn_blocking` when polling from async code.
pub struct RestClient {
    host: String,
    base_url: String,
    username: String,
    password: String,
    http: Client,
}

impl RestClient {
    pub fn new(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .danger_accept_invalid_hostnames(!config.verify_tls)
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        let http = Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        Ok(Self {
            host: config.host.clone(),
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        })
    }

    fn get(&self, path: &str) -> Result<Value, ClusterError> {
        let url = format!("{}/{}", self.base_url, path);
        trace!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()?;
        decode(resp)
    }

    /// Runs one command against a database through the API.
    fn command(&self, db: &DatabaseDescriptor, verb: &str, args: &[String]) -> Result<Value, ClusterError> {
        let url = format!("{}/bdbs/{}/command", self.base_url, db.uid);
        trace!(%url, verb, ?args, "command");
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&command_body(verb, args))
            .send()?;
        decode(resp)
    }
}

fn command_body(verb: &str, args: &[String]) -> Value {
    json!({ "command": verb, "args": args })
}

fn decode(resp: Response) -> Result<Value, ClusterError> {
    let status = resp.status();
    let text = if status.is_success() {
        resp.text()?
    } else {
        resp.text().unwrap_or_default()
    };
    decode_body(status, &text)
}

fn decode_body(status: StatusCode, text: &str) -> Result<Value, ClusterError> {
    if !status.is_success() {
        return Err(ClusterError::Status {
            status: status.as_u16(),
            body: text.to_string(),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| ClusterError::Decode(e.to_string()))
}

/// Parses the `GET /bdbs` listing. `uid` may be a number or a string.
pub(crate) fn parse_databases(body: &Value) -> Result<Vec<DatabaseDescriptor>, ClusterError> {
    let Some(items) = body.as_array() else {
        return Err(ClusterError::Decode(format!("database listing is not a list: {}", body)));
    };
    items
        .iter()
        .map(|item| {
            let uid = match item.get("uid") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => return Err(ClusterError::Decode(format!("database without uid: {}", item))),
            };
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ClusterError::Decode(format!("database without name: {}", item)))?;
            Ok(DatabaseDescriptor::new(uid, name))
        })
        .collect()
}

impl Directory for RestClient {
    fn cluster(&self) -> &str {
        &self.host
    }

    fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, ClusterError> {
        let body = self.get("bdbs")?;
        let dbs = parse_databases(&body)?;
        debug!(count = dbs.len(), "listed databases");
        Ok(dbs)
    }

    fn thresholds(&self, db: &DatabaseDescriptor) -> Result<Thresholds, ClusterError> {
        let get = |param: &str| {
            let body = self.command(db, "CONFIG", &["GET".to_string(), param.to_string()])?;
            slowlog::config_value(param, &body)
        };
        Ok(Thresholds {
            slower_than: get(SLOWER_THAN_PARAM)?,
            max_len: get(MAX_LEN_PARAM)?,
        })
    }

    fn set_slower_than(&self, db: &DatabaseDescriptor, value: i64) -> Result<(), ClusterError> {
        let args = ["SET".to_string(), SLOWER_THAN_PARAM.to_string(), value.to_string()];
        self.command(db, "CONFIG", &args).map(|_| ())
    }

    fn set_max_len(&self, db: &DatabaseDescriptor, value: i64) -> Result<(), ClusterError> {
        let args = ["SET".to_string(), MAX_LEN_PARAM.to_string(), value.to_string()];
        self.command(db, "CONFIG", &args).map(|_| ())
    }
}

impl SlowlogTransport for RestClient {
    fn fetch_slowlog(&self, db: &DatabaseDescriptor) -> Result<Vec<RawEntry>, ClusterError> {
        slowlog::fetch(&self.host, &db.name, |verb, args| self.command(db, verb, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_databases_accepts_numeric_and_string_uids() {
        let body = json!([
            {"uid": 1, "name": "db-1", "memory_size": 100},
            {"uid": "2", "name": "orders"},
        ]);
        let dbs = parse_databases(&body).unwrap();
        assert_eq!(
            dbs,
            vec![
                DatabaseDescriptor::new("1", "db-1"),
                DatabaseDescriptor::new("2", "orders"),
            ]
        );
    }

    #[test]
    fn parse_databases_rejects_incomplete_items() {
        assert!(parse_databases(&json!([{"name": "db-1"}])).is_err());
        assert!(parse_databases(&json!([{"uid": 1}])).is_err());
        assert!(parse_databases(&json!({"uid": 1})).is_err());
        assert!(parse_databases(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn command_body_shape() {
        let body = command_body("SLOWLOG", &["GET".to_string(), "10".to_string()]);
        assert_eq!(body, json!({"command": "SLOWLOG", "args": ["GET", "10"]}));
    }

    #[test]
    fn non_success_status_maps_to_status_error() {
        let err = decode_body(StatusCode::UNAUTHORIZED, "bad credentials").unwrap_err();
        assert_eq!(
            err,
            ClusterError::Status {
                status: 401,
                body: "bad credentials".to_string(),
            }
        );
        assert!(matches!(
            decode_body(StatusCode::NOT_FOUND, ""),
            Err(ClusterError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn success_bodies_decode() {
        assert_eq!(decode_body(StatusCode::OK, "").unwrap(), Value::Null);
        assert_eq!(
            decode_body(StatusCode::OK, r#"{"response": 3}"#).unwrap(),
            json!({"response": 3})
        );
        assert!(matches!(
            decode_body(StatusCode::OK, "<html>"),
            Err(ClusterError::Decode(_))
        ));
    }

    #[test]
    fn client_builds_without_network() {
        let mut config = ClusterConfig::new("cluster.example.com", "admin", "secret");
        config.verify_tls = false;
        let client = RestClient::new(&config).unwrap();
        assert_eq!(client.cluster(), "cluster.example.com");
        assert_eq!(client.base_url, "https://cluster.example.com:9443/v1");
    }
}
