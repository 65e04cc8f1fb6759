//! One polling cycle: fetch, filter, normalize, record.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::cluster::ClusterApi;
use crate::filter::DatabaseFilter;
use crate::model::{DatabaseDescriptor, EventError, Metric, SlowlogEvent, SlowlogSource};
use crate::poller::poll;
use crate::registry::MetricRegistry;

pub const SLOWLOG_COUNT_HELP: &str = "Number of slowlog entries in database";
pub const POLL_TIME: &str = "slowlog_poll_with_timing";
pub const POLL_TIME_HELP: &str = "Time spent polling slowlog";
pub const POLL_SAMPLES: &str = "slowlog_poll_samples";
pub const POLL_ERRORS: &str = "slowlog_poll_errors";

pub const CLUSTER_LABEL: &str = "cluster";
pub const DATABASE_LABEL: &str = "bdb_name";

/// Outcome of one cycle. Not persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollCycleResult {
    /// Samples recorded (or handed to the caller).
    pub samples: usize,
    /// Entries retrieved but not part of the telemetry contract.
    pub unrecognized: usize,
    /// Transport and directory failures.
    pub errors: usize,
    pub duration: Duration,
}

/// How loudly unrecognized entries are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// One-shot run: every unrecognized entry is a warning.
    Interactive,
    /// Scheduled polling: unrecognized entries are debug noise.
    Background,
}

pub struct TelemetryPoller<C: ?Sized> {
    cluster: Arc<C>,
    filter: DatabaseFilter,
    registry: Option<Arc<MetricRegistry>>,
    log_mode: LogMode,
    purge_stale: bool,
    // (cluster, bdb_name) pairs currently exposed by the registry.
    recorded: Mutex<HashSet<(String, String)>>,
}

impl<C: ClusterApi + ?Sized> TelemetryPoller<C> {
    pub fn new(cluster: Arc<C>, filter: DatabaseFilter) -> Self {
        Self {
            cluster,
            filter,
            registry: None,
            log_mode: LogMode::Interactive,
            purge_stale: false,
            recorded: Mutex::new(HashSet::new()),
        }
    }

    /// Records samples into `registry` and switches to background logging.
    pub fn with_registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.registry = Some(registry);
        self.log_mode = LogMode::Background;
        self
    }

    /// Removes series of databases that are no longer listed or no longer
    /// pass the filter. Off by default: such series keep their last value.
    pub fn purge_stale(mut self, purge: bool) -> Self {
        self.purge_stale = purge;
        self
    }

    /// Runs one cycle. `on_sample` sees every recognized sample in order.
    ///
    /// Never fails: per-database and per-entry problems are logged and counted.
    pub fn run_cycle(&self, mut on_sample: impl FnMut(&SlowlogSource, &Metric)) -> PollCycleResult {
        let t0 = Instant::now();
        let mut result = PollCycleResult::default();
        let mut included: HashSet<String> = HashSet::new();
        let mut sampled: HashSet<(String, String)> = HashSet::new();

        let mut events = poll(self.cluster.as_ref(), |db: &DatabaseDescriptor| {
            let include = self.filter.include(db);
            if include {
                included.insert(db.name.clone());
            }
            include
        });

        for event in &mut events {
            match event {
                SlowlogEvent::Sample { source, metric } => {
                    if let Some(registry) = &self.registry {
                        let labels = [
                            (CLUSTER_LABEL, source.cluster.as_str()),
                            (DATABASE_LABEL, source.db.as_str()),
                        ];
                        if let Err(e) =
                            registry.set_gauge(&metric.name, SLOWLOG_COUNT_HELP, &labels, metric.value)
                        {
                            error!(cluster = %source.cluster, db = %source.db, error = %e, "failed to record sample");
                            result.errors += 1;
                            continue;
                        }
                    }
                    debug!(cluster = %source.cluster, db = %source.db, value = metric.value, "slowlog sample");
                    on_sample(&source, &metric);
                    sampled.insert((source.cluster, source.db));
                    result.samples += 1;
                }
                SlowlogEvent::Error {
                    source,
                    error: EventError::Unrecognized(metric),
                } => {
                    result.unrecognized += 1;
                    match self.log_mode {
                        LogMode::Interactive => warn!(
                            cluster = %source.cluster,
                            db = %source.db,
                            slowlog_id = %source.slowlog_id,
                            metric = %metric.name,
                            value = metric.value,
                            "unrecognized slowlog entry"
                        ),
                        LogMode::Background => debug!(
                            cluster = %source.cluster,
                            db = %source.db,
                            slowlog_id = %source.slowlog_id,
                            metric = %metric.name,
                            value = metric.value,
                            "unrecognized slowlog entry"
                        ),
                    }
                }
                SlowlogEvent::Error {
                    source,
                    error: EventError::Transport(msg),
                } => {
                    result.errors += 1;
                    error!(cluster = %source.cluster, db = %source.db, error = %msg, "slowlog poll failed");
                }
            }
        }
        let listing_failed = events.listing_failed();
        drop(events);

        self.track_series(sampled, &included, listing_failed);
        result.duration = t0.elapsed();
        self.record_cycle(&result);
        result
    }

    fn track_series(
        &self,
        sampled: HashSet<(String, String)>,
        included: &HashSet<String>,
        listing_failed: bool,
    ) {
        let Some(registry) = &self.registry else {
            return;
        };
        let mut recorded = self.recorded.lock().unwrap_or_else(|e| e.into_inner());
        if self.purge_stale && !listing_failed {
            recorded.retain(|(cluster, db)| {
                if included.contains(db) {
                    return true;
                }
                let labels = [(CLUSTER_LABEL, cluster.as_str()), (DATABASE_LABEL, db.as_str())];
                registry.remove_gauge(crate::normalize::SLOWLOG_COUNT, &labels);
                debug!(cluster = %cluster, db = %db, "purged stale series");
                false
            });
        }
        recorded.extend(sampled);
    }

    fn record_cycle(&self, result: &PollCycleResult) {
        let Some(registry) = &self.registry else {
            return;
        };
        let cluster = [(CLUSTER_LABEL, self.cluster.cluster())];
        let counts = [
            (POLL_SAMPLES, "Samples recorded by the last poll cycle", result.samples),
            (POLL_ERRORS, "Transport errors in the last poll cycle", result.errors),
        ];
        for (name, help, value) in counts {
            if let Err(e) = registry.set_gauge(name, help, &cluster, value as f64) {
                error!(metric = name, error = %e, "failed to record cycle result");
            }
        }
    }
}
