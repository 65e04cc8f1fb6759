//! Operator allowlist over database identifiers and names.

use std::collections::HashSet;

use crate::model::DatabaseDescriptor;

/// Decides which databases a cycle touches.
///
/// An empty allowlist includes everything. Otherwise a database is included
/// when its uid *or* its name is listed; uids and names may be mixed freely.
#[derive(Debug, Clone, Default)]
pub struct DatabaseFilter {
    allow: HashSet<String>,
}

impl DatabaseFilter {
    pub fn new<I, S>(allowlist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: allowlist.into_iter().map(Into::into).collect(),
        }
    }

    /// Filter that includes every database.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allow.is_empty()
    }

    pub fn include(&self, db: &DatabaseDescriptor) -> bool {
        self.allow.is_empty() || self.allow.contains(&db.uid) || self.allow.contains(&db.name)
    }
}
