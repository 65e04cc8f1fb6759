//! Lazy slow-log sequence for one polling cycle.
//!
//! Nothing is fetched until the sequence is first advanced. The directory is
//! listed once, then each included database is fetched in listing order and
//! its entries are yielded before the next database is touched. A failing
//! database yields a single transport error event and polling moves on.

use std::collections::VecDeque;
use std::vec;

use crate::cluster::{Directory, SlowlogTransport};
use crate::model::{DatabaseDescriptor, SlowlogEvent};
use crate::normalize::{normalize, transport_error};

/// Starts a polling cycle over every database accepted by `include`.
pub fn poll<C, F>(cluster: &C, include: F) -> SlowlogPoll<'_, C, F>
where
    C: Directory + SlowlogTransport + ?Sized,
    F: FnMut(&DatabaseDescriptor) -> bool,
{
    SlowlogPoll {
        cluster,
        include,
        databases: None,
        pending: VecDeque::new(),
        listing_failed: false,
    }
}

pub struct SlowlogPoll<'a, C: ?Sized, F> {
    cluster: &'a C,
    include: F,
    databases: Option<vec::IntoIter<DatabaseDescriptor>>,
    pending: VecDeque<SlowlogEvent>,
    listing_failed: bool,
}

impl<C: ?Sized, F> SlowlogPoll<'_, C, F> {
    /// True once the directory listing of this cycle has failed.
    pub fn listing_failed(&self) -> bool {
        self.listing_failed
    }
}

impl<C, F> Iterator for SlowlogPoll<'_, C, F>
where
    C: Directory + SlowlogTransport + ?Sized,
    F: FnMut(&DatabaseDescriptor) -> bool,
{
    type Item = SlowlogEvent;

    fn next(&mut self) -> Option<SlowlogEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            if self.databases.is_none() {
                match self.cluster.list_databases() {
                    Ok(dbs) => self.databases = Some(dbs.into_iter()),
                    Err(e) => {
                        self.databases = Some(Vec::new().into_iter());
                        self.listing_failed = true;
                        return Some(transport_error(self.cluster.cluster(), "", e.to_string()));
                    }
                }
            }

            let db = self.databases.as_mut()?.next()?;
            if !(self.include)(&db) {
                continue;
            }
            match self.cluster.fetch_slowlog(&db) {
                Ok(entries) => self.pending.extend(entries.into_iter().map(normalize)),
                Err(e) => {
                    return Some(transport_error(self.cluster.cluster(), &db.name, e.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use crate::filter::DatabaseFilter;
    use crate::model::EventError;
    use crate::normalize::SLOWLOG_COUNT;

    #[test]
    fn single_database_fixture() {
        // Length probe answers 100, the list holds 112 records.
        let cluster = MockCluster::new("cluster_host")
            .with_database("1", "db-1")
            .with_generated_slowlog("1", 100, 112);
        let filter = DatabaseFilter::all();
        let mut evaluated = Vec::new();

        let events: Vec<_> = poll(&cluster, |db: &DatabaseDescriptor| {
            let included = filter.include(db);
            evaluated.push((db.name.clone(), included));
            included
        })
        .collect();

        assert_eq!(events.len(), 113);
        let first = events[0].metric().unwrap();
        assert_eq!(first.name, SLOWLOG_COUNT);
        assert_eq!(first.value, 100.0);
        assert!(events[0].is_sample());
        assert!(events[1..].iter().all(|e| !e.is_sample()));
        assert_eq!(evaluated, vec![("db-1".to_string(), true)]);
    }

    #[test]
    fn nothing_is_fetched_before_iteration() {
        let cluster = MockCluster::new("c1").with_database("1", "db-1");
        let mut events = poll(&cluster, |_: &DatabaseDescriptor| true);
        assert!(cluster.fetches().is_empty());
        assert!(events.next().is_some());
        assert_eq!(cluster.fetches(), vec!["1"]);
    }

    #[test]
    fn one_failing_database_does_not_stop_the_cycle() {
        let cluster = MockCluster::new("c1")
            .with_database("1", "db-1")
            .with_database("2", "db-2")
            .with_database("3", "db-3")
            .with_generated_slowlog("1", 4, 0)
            .with_generated_slowlog("3", 6, 0)
            .failing("2");

        let events: Vec<_> = poll(&cluster, |_: &DatabaseDescriptor| true).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].source().db, "db-1");
        assert!(matches!(
            &events[1],
            SlowlogEvent::Error { source, error: EventError::Transport(_) } if source.db == "db-2"
        ));
        assert_eq!(events[2].source().db, "db-3");
        assert_eq!(events[2].metric().unwrap().value, 6.0);
        assert_eq!(cluster.fetches(), vec!["1", "2", "3"]);
    }

    #[test]
    fn excluded_databases_are_never_fetched() {
        let cluster = MockCluster::new("c1")
            .with_database("1", "db-1")
            .with_database("2", "orders")
            .with_database("3", "sessions");
        let filter = DatabaseFilter::new(["1", "sessions"]);

        let events: Vec<_> = poll(&cluster, |db: &DatabaseDescriptor| filter.include(db)).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(cluster.fetches(), vec!["1", "3"]);
    }

    #[test]
    fn unreachable_directory_yields_one_error() {
        let cluster = MockCluster::new("c1").with_database("1", "db-1").unreachable();
        let mut events = poll(&cluster, |_: &DatabaseDescriptor| true);
        let first = events.next().unwrap();
        assert!(matches!(first, SlowlogEvent::Error { error: EventError::Transport(_), .. }));
        assert!(events.listing_failed());
        assert!(events.next().is_none());
        assert!(cluster.fetches().is_empty());
    }

    #[test]
    fn databases_are_concatenated_in_listing_order() {
        let cluster = MockCluster::new("c1")
            .with_database("2", "b")
            .with_database("1", "a")
            .with_generated_slowlog("2", 2, 2)
            .with_generated_slowlog("1", 1, 1);
        let dbs: Vec<_> = poll(&cluster, |_: &DatabaseDescriptor| true)
            .map(|e| e.source().db.clone())
            .collect();
        assert_eq!(dbs, vec!["b", "b", "b", "a", "a"]);
    }
}
