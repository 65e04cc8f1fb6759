//! Background polling: fixed-interval tick loop, one cycle at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use slowlog_core::registry::MetricRegistry;
use slowlog_core::telemetry::{POLL_TIME, POLL_TIME_HELP, PollCycleResult};

/// Spawns the tick loop on the current runtime.
pub(crate) fn start<F>(interval: Duration, registry: Arc<MetricRegistry>, job: F) -> JoinHandle<()>
where
    F: Fn() -> PollCycleResult + Send + Sync + 'static,
{
    tokio::spawn(tick_loop(interval, registry, Arc::new(job)))
}

/// Runs `job` every `interval`, first one interval after start.
///
/// Each run is awaited before the next tick is taken, so cycles never
/// overlap; a cycle that overruns pushes the next one back instead of
/// stacking. The wall time of every run goes into the poll timing histogram.
pub(crate) async fn tick_loop<F>(interval: Duration, registry: Arc<MetricRegistry>, job: Arc<F>)
where
    F: Fn() -> PollCycleResult + Send + Sync + 'static,
{
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle_count: u64 = 0;

    loop {
        tick.tick().await;

        // Polling blocks on the network; keep it off the async workers.
        let job = job.clone();
        let t0 = Instant::now();
        let result = tokio::task::spawn_blocking(move || job()).await;
        let elapsed = t0.elapsed();

        if let Err(e) = registry.observe(POLL_TIME, POLL_TIME_HELP, elapsed.as_secs_f64()) {
            error!(error = %e, "failed to record poll duration");
        }

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "poll cycle panicked in spawn_blocking");
                continue;
            }
        };

        cycle_count += 1;
        if cycle_count == 1 {
            info!(
                duration_ms = elapsed.as_millis() as u64,
                samples = result.samples,
                errors = result.errors,
                "first poll cycle completed"
            );
        } else {
            debug!(
                duration_ms = elapsed.as_millis() as u64,
                samples = result.samples,
                unrecognized = result.unrecognized,
                errors = result.errors,
                cycle_count,
                "poll cycle completed"
            );
        }

        if elapsed > interval / 2 {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "poll cycle exceeded 50% of interval"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use slowlog_core::cluster::MockCluster;
    use slowlog_core::filter::DatabaseFilter;
    use slowlog_core::normalize::SLOWLOG_COUNT;
    use slowlog_core::telemetry::TelemetryPoller;

    #[tokio::test]
    async fn first_run_waits_one_interval() {
        let registry = Arc::new(MetricRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = start(Duration::from_millis(200), registry, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            PollCycleResult::default()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(runs.load(Ordering::SeqCst) >= 1);
        handle.abort();
    }

    #[tokio::test]
    async fn cycles_never_overlap() {
        let registry = Arc::new(MetricRegistry::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let (f, m, r) = (in_flight.clone(), max_in_flight.clone(), runs.clone());
        // Each run takes longer than the interval.
        let handle = start(Duration::from_millis(10), registry.clone(), move || {
            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(40));
            f.fetch_sub(1, Ordering::SeqCst);
            r.fetch_add(1, Ordering::SeqCst);
            PollCycleResult::default()
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.abort();
        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_run_is_timed() {
        let registry = Arc::new(MetricRegistry::new());
        let handle = start(Duration::from_millis(20), registry.clone(), PollCycleResult::default);

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();
        let text = registry.render().unwrap();
        assert!(text.contains("# TYPE slowlog_poll_with_timing histogram"));
        assert!(text.contains("slowlog_poll_with_timing_count"));
    }

    #[tokio::test]
    async fn render_during_slow_poll_sees_committed_values() {
        let cluster = Arc::new(
            MockCluster::new("c1")
                .with_database("1", "db-1")
                .with_generated_slowlog("1", 10, 0)
                .with_generated_slowlog("1", 20, 0)
                .with_delay(Duration::from_millis(150)),
        );
        let registry = Arc::new(MetricRegistry::new());
        let poller = TelemetryPoller::new(cluster, DatabaseFilter::all()).with_registry(registry.clone());
        let handle = start(Duration::from_millis(10), registry.clone(), move || {
            poller.run_cycle(|_, _| {})
        });

        let labels = [("cluster", "c1"), ("bdb_name", "db-1")];
        let deadline = Instant::now() + Duration::from_millis(600);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            // The registry stays readable while a cycle is blocked in the transport.
            let text = registry.render().unwrap();
            if let Some(line) = text.lines().find(|l| l.starts_with("slowlog_count{")) {
                seen.push(line.rsplit(' ').next().unwrap().to_string());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        assert!(!seen.is_empty());
        assert!(seen.iter().all(|v| ["10", "20", "0"].contains(&v.as_str())));
        assert!(registry.gauge_value(SLOWLOG_COUNT, &labels).is_some());
    }
}
