//! Per-database slow-log threshold reads and writes.
//!
//! Each database is handled on its own: a failure on one is reported and the
//! remaining databases are still processed. Nothing is rolled back.

use tracing::{debug, error, info};

use crate::cluster::{ClusterError, Directory, Thresholds};
use crate::filter::DatabaseFilter;

/// Requested threshold changes. Either, both or neither may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdChange {
    pub slower_than: Option<i64>,
    pub max_len: Option<i64>,
}

impl ThresholdChange {
    /// True when nothing is to be written; callers read instead.
    pub fn is_empty(&self) -> bool {
        self.slower_than.is_none() && self.max_len.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdReport {
    pub name: String,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseFailure {
    pub database: String,
    pub error: ClusterError,
}

/// Result of a read or write pass over the filtered databases.
#[derive(Debug, Default)]
pub struct ThresholdOutcome {
    pub reports: Vec<ThresholdReport>,
    /// Names of databases whose writes all succeeded.
    pub updated: Vec<String>,
    pub failures: Vec<DatabaseFailure>,
}

/// Reads current thresholds of every filtered database.
///
/// Fails only when the directory itself cannot be listed.
pub fn read_thresholds<D: Directory + ?Sized>(
    directory: &D,
    filter: &DatabaseFilter,
) -> Result<ThresholdOutcome, ClusterError> {
    let mut outcome = ThresholdOutcome::default();
    for db in directory.list_databases()? {
        if !filter.include(&db) {
            continue;
        }
        match directory.thresholds(&db) {
            Ok(thresholds) => outcome.reports.push(ThresholdReport {
                name: db.name,
                thresholds,
            }),
            Err(e) => {
                error!(db = %db.name, error = %e, "failed to read slowlog thresholds");
                outcome.failures.push(DatabaseFailure {
                    database: db.name,
                    error: e,
                });
            }
        }
    }
    Ok(outcome)
}

/// Applies `change` to every filtered database.
///
/// The two settings are written independently: a failed `slower_than` write
/// does not prevent the `max_len` write.
pub fn apply_thresholds<D: Directory + ?Sized>(
    directory: &D,
    filter: &DatabaseFilter,
    change: ThresholdChange,
) -> Result<ThresholdOutcome, ClusterError> {
    let mut outcome = ThresholdOutcome::default();
    if change.is_empty() {
        return Ok(outcome);
    }

    for db in directory.list_databases()? {
        if !filter.include(&db) {
            continue;
        }
        let mut ok = true;
        if let Some(value) = change.slower_than {
            if let Err(e) = directory.set_slower_than(&db, value) {
                error!(db = %db.name, value, error = %e, "failed to set slowlog-log-slower-than");
                outcome.failures.push(DatabaseFailure {
                    database: db.name.clone(),
                    error: e,
                });
                ok = false;
            } else {
                debug!(db = %db.name, value, "set slowlog-log-slower-than");
            }
        }
        if let Some(value) = change.max_len {
            if let Err(e) = directory.set_max_len(&db, value) {
                error!(db = %db.name, value, error = %e, "failed to set slowlog-max-len");
                outcome.failures.push(DatabaseFailure {
                    database: db.name.clone(),
                    error: e,
                });
                ok = false;
            } else {
                debug!(db = %db.name, value, "set slowlog-max-len");
            }
        }
        if ok {
            info!(db = %db.name, ?change, "slowlog thresholds updated");
            outcome.updated.push(db.name);
        }
    }
    Ok(outcome)
}
