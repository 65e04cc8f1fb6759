//! In-memory cluster for testing pollers without a real cluster.
//!
//! `MockCluster` answers the `SLOWLOG` commands of the same fetch sequence
//! the REST client runs, from scripted response bodies, and records every
//! call it receives.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use super::slowlog;
use super::{ClusterError, Directory, SlowlogTransport, Thresholds};
use crate::model::{DatabaseDescriptor, RawEntry};

/// Thresholds a fresh database starts with.
pub const DEFAULT_THRESHOLDS: Thresholds = Thresholds {
    slower_than: 10_000,
    max_len: 128,
};

/// Scripted responses for one database: pairs of (LEN, GET) bodies.
type Script = VecDeque<(Value, Value)>;

#[derive(Debug, Default)]
pub struct MockCluster {
    cluster: String,
    databases: Mutex<Vec<DatabaseDescriptor>>,
    unreachable: AtomicBool,
    failing: HashSet<String>,
    delay: Option<Duration>,
    scripts: Mutex<HashMap<String, Script>>,
    thresholds: Mutex<HashMap<String, Thresholds>>,
    fetches: Mutex<Vec<String>>,
    commands: Mutex<Vec<(String, String)>>,
    writes: Mutex<Vec<(String, &'static str, i64)>>,
}

impl MockCluster {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            ..Self::default()
        }
    }

    pub fn with_database(self, uid: &str, name: &str) -> Self {
        self.databases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DatabaseDescriptor::new(uid, name));
        self
    }

    /// Queues one poll's worth of responses for database `uid`.
    ///
    /// Once the queue is exhausted the database reports an empty slow-log.
    pub fn with_slowlog(self, uid: &str, len_body: Value, get_body: Value) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(uid.to_string())
            .or_default()
            .push_back((len_body, get_body));
        self
    }

    /// Queues a slow-log of `len` length whose GET returns `records` entries.
    pub fn with_generated_slowlog(self, uid: &str, len: u64, records: usize) -> Self {
        let list: Vec<Value> = (0..records)
            .map(|i| json!([records - i, 1_700_000_000 + i, 10_000 + i * 10, ["GET", format!("key:{}", i)]]))
            .collect();
        self.with_slowlog(uid, json!({ "response": len }), json!({ "response": list }))
    }

    /// Makes every slow-log fetch for database `uid` fail.
    pub fn failing(mut self, uid: &str) -> Self {
        self.failing.insert(uid.to_string());
        self
    }

    /// Makes the database listing fail.
    pub fn unreachable(self) -> Self {
        self.set_unreachable(true);
        self
    }

    /// Toggles directory failures on a shared instance.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }

    /// Delays every slow-log fetch, simulating a slow transport.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_thresholds(self, uid: &str, thresholds: Thresholds) -> Self {
        self.thresholds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uid.to_string(), thresholds);
        self
    }

    /// Replaces the database listing on a shared instance (topology change).
    pub fn set_databases(&self, databases: Vec<DatabaseDescriptor>) {
        *self.databases.lock().unwrap_or_else(|e| e.into_inner()) = databases;
    }

    /// Uids of databases whose slow-log was fetched, in call order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Commands sent to databases as `(uid, "VERB ARGS..")`, in call order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Threshold writes as `(uid, param, value)`, in call order.
    pub fn writes(&self) -> Vec<(String, &'static str, i64)> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_failing(&self, db: &DatabaseDescriptor) -> Result<(), ClusterError> {
        if self.failing.contains(&db.uid) {
            return Err(ClusterError::Request(format!(
                "connection to database {} refused",
                db.uid
            )));
        }
        Ok(())
    }

    fn write(&self, db: &DatabaseDescriptor, param: &'static str, value: i64) -> Result<(), ClusterError> {
        self.check_failing(db)?;
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((db.uid.clone(), param, value));
        let mut thresholds = self.thresholds.lock().unwrap_or_else(|e| e.into_inner());
        let current = thresholds.entry(db.uid.clone()).or_insert(DEFAULT_THRESHOLDS);
        if param == slowlog::SLOWER_THAN_PARAM {
            current.slower_than = value;
        } else {
            current.max_len = value;
        }
        Ok(())
    }
}

impl Directory for MockCluster {
    fn cluster(&self) -> &str {
        &self.cluster
    }

    fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, ClusterError> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(ClusterError::Request(format!("{}: connection refused", self.cluster)));
        }
        Ok(self.databases.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn thresholds(&self, db: &DatabaseDescriptor) -> Result<Thresholds, ClusterError> {
        self.check_failing(db)?;
        Ok(self
            .thresholds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&db.uid)
            .copied()
            .unwrap_or(DEFAULT_THRESHOLDS))
    }

    fn set_slower_than(&self, db: &DatabaseDescriptor, value: i64) -> Result<(), ClusterError> {
        self.write(db, slowlog::SLOWER_THAN_PARAM, value)
    }

    fn set_max_len(&self, db: &DatabaseDescriptor, value: i64) -> Result<(), ClusterError> {
        self.write(db, slowlog::MAX_LEN_PARAM, value)
    }
}

impl SlowlogTransport for MockCluster {
    fn fetch_slowlog(&self, db: &DatabaseDescriptor) -> Result<Vec<RawEntry>, ClusterError> {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(db.uid.clone());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.check_failing(db)?;

        let scripted = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&db.uid)
            .and_then(VecDeque::pop_front);
        let (len_body, get_body) =
            scripted.unwrap_or_else(|| (json!({ "response": 0 }), json!({ "response": [] })));
        let mut get_body = Some(get_body);

        slowlog::fetch(&self.cluster, &db.name, |verb, args| {
            self.commands
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((db.uid.clone(), format!("{} {}", verb, args.join(" "))));
            match args.first().map(String::as_str) {
                Some("LEN") => Ok(len_body.clone()),
                Some("GET") => Ok(get_body.take().unwrap_or_else(|| json!({ "response": [] }))),
                _ => Err(ClusterError::Request(format!("unsupported command {} {:?}", verb, args))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::SLOWLOG_COUNT;

    #[test]
    fn scripted_responses_are_consumed_in_order() {
        let cluster = MockCluster::new("c1")
            .with_database("1", "db-1")
            .with_generated_slowlog("1", 5, 2)
            .with_generated_slowlog("1", 9, 0);
        let db = DatabaseDescriptor::new("1", "db-1");

        let first = cluster.fetch_slowlog(&db).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].metric.name, SLOWLOG_COUNT);
        assert_eq!(first[0].metric.value, 5.0);

        let second = cluster.fetch_slowlog(&db).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].metric.value, 9.0);

        // Exhausted script: empty slow-log.
        let third = cluster.fetch_slowlog(&db).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].metric.value, 0.0);

        assert_eq!(cluster.fetches(), vec!["1", "1", "1"]);
    }

    #[test]
    fn empty_slowlog_is_not_listed() {
        let cluster = MockCluster::new("c1").with_database("1", "db-1").with_slowlog(
            "1",
            json!({"response": 0}),
            json!({"response": [[2, 1700000001, 300, []], [1, 1700000000, 200, []]]}),
        );
        let db = DatabaseDescriptor::new("1", "db-1");

        let entries = cluster.fetch_slowlog(&db).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metric.value, 0.0);
        assert_eq!(cluster.commands(), vec![("1".to_string(), "SLOWLOG LEN".to_string())]);
    }

    #[test]
    fn list_asks_for_reported_length() {
        let cluster = MockCluster::new("c1")
            .with_database("1", "db-1")
            .with_generated_slowlog("1", 100, 3);
        let db = DatabaseDescriptor::new("1", "db-1");

        assert_eq!(cluster.fetch_slowlog(&db).unwrap().len(), 4);
        let sent: Vec<_> = cluster.commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(sent, vec!["SLOWLOG LEN", "SLOWLOG GET 100"]);
    }

    #[test]
    fn failing_database_errors() {
        let cluster = MockCluster::new("c1").with_database("1", "db-1").failing("1");
        let db = DatabaseDescriptor::new("1", "db-1");
        assert!(matches!(cluster.fetch_slowlog(&db), Err(ClusterError::Request(_))));
        assert!(cluster.thresholds(&db).is_err());
        assert!(cluster.set_max_len(&db, 10).is_err());
        assert!(cluster.writes().is_empty());
    }

    #[test]
    fn unreachable_directory() {
        let cluster = MockCluster::new("c1").with_database("1", "db-1").unreachable();
        assert!(cluster.list_databases().is_err());
        cluster.set_unreachable(false);
        assert_eq!(cluster.list_databases().unwrap().len(), 1);
    }

    #[test]
    fn topology_can_change() {
        let cluster = MockCluster::new("c1").with_database("1", "db-1");
        cluster.set_databases(vec![DatabaseDescriptor::new("2", "db-2")]);
        assert_eq!(
            cluster.list_databases().unwrap(),
            vec![DatabaseDescriptor::new("2", "db-2")]
        );
    }

    #[test]
    fn threshold_writes_are_visible_to_reads() {
        let cluster = MockCluster::new("c1").with_database("1", "db-1");
        let db = DatabaseDescriptor::new("1", "db-1");
        assert_eq!(cluster.thresholds(&db).unwrap(), DEFAULT_THRESHOLDS);

        cluster.set_slower_than(&db, 500).unwrap();
        cluster.set_max_len(&db, 64).unwrap();
        assert_eq!(
            cluster.thresholds(&db).unwrap(),
            Thresholds {
                slower_than: 500,
                max_len: 64
            }
        );
        assert_eq!(cluster.writes().len(), 2);
    }
}
