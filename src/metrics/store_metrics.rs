//! Store metrics tracking using OpenTelemetry.

use crate::notify::BroadcastReport;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for store operations.
///
/// Attach it with
/// [`ConfigStoreBuilder::with_metrics`](crate::core::ConfigStoreBuilder::with_metrics);
/// the store records into it on every update, subscription change and source
/// failure.
///
/// # Examples
///
/// ```rust,no_run
/// use hotstore::metrics::StoreMetrics;
/// use opentelemetry::global;
///
/// let metrics = StoreMetrics::new(global::meter("hotstore"));
/// metrics.update_config_age();
/// ```
#[derive(Clone)]
pub struct StoreMetrics {
    updates_accepted: Counter<u64>,
    updates_rejected: Counter<u64>,
    validation_failures: Counter<u64>,
    source_load_failures: Counter<u64>,
    source_watch_failures: Counter<u64>,
    source_update_errors: Counter<u64>,
    reverts: Counter<u64>,
    dropped_slow: Counter<u64>,
    active_subscribers: Gauge<i64>,
    version: Gauge<u64>,
    config_age_seconds: Gauge<i64>,
    update_duration: Histogram<f64>,
    last_update: Arc<parking_lot::Mutex<Instant>>,
}

impl StoreMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let updates_accepted = meter
            .u64_counter("hotstore.updates.accepted")
            .with_description("Number of accepted configuration updates")
            .build();

        let updates_rejected = meter
            .u64_counter("hotstore.updates.rejected")
            .with_description("Number of rejected configuration updates")
            .build();

        let validation_failures = meter
            .u64_counter("hotstore.validation.failures")
            .with_description("Number of candidates that failed validation")
            .build();

        let source_load_failures = meter
            .u64_counter("hotstore.source.load_failures")
            .with_description("Number of failed source loads during bootstrap")
            .build();

        let source_watch_failures = meter
            .u64_counter("hotstore.source.watch_failures")
            .with_description("Number of watch loops that ended in failure")
            .build();

        let source_update_errors = meter
            .u64_counter("hotstore.source.update_errors")
            .with_description("Number of source updates that were not applied")
            .build();

        let reverts = meter
            .u64_counter("hotstore.reverts")
            .with_description("Number of reverts to an earlier version")
            .build();

        let dropped_slow = meter
            .u64_counter("hotstore.subscribers.dropped_slow")
            .with_description("Number of subscribers dropped for falling behind")
            .build();

        let active_subscribers = meter
            .i64_gauge("hotstore.subscribers.active")
            .with_description("Number of active subscribers")
            .build();

        let version = meter
            .u64_gauge("hotstore.version")
            .with_description("Current configuration version")
            .build();

        let config_age_seconds = meter
            .i64_gauge("hotstore.age")
            .with_description("Time since last configuration update in seconds")
            .with_unit("s")
            .build();

        let update_duration = meter
            .f64_histogram("hotstore.update.duration")
            .with_description("Duration of update operations in seconds")
            .with_unit("s")
            .build();

        Self {
            updates_accepted,
            updates_rejected,
            validation_failures,
            source_load_failures,
            source_watch_failures,
            source_update_errors,
            reverts,
            dropped_slow,
            active_subscribers,
            version,
            config_age_seconds,
            update_duration,
            last_update: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    /// Start timing one update; the duration is recorded when the timer drops.
    pub(crate) fn start_update(&self, origin: &'static str) -> UpdateTimer {
        UpdateTimer {
            histogram: self.update_duration.clone(),
            origin,
            start: Instant::now(),
        }
    }

    pub(crate) fn record_accepted(&self, origin: &'static str, version: u64) {
        self.updates_accepted
            .add(1, &[KeyValue::new("origin", origin)]);
        self.version.record(version, &[]);

        *self.last_update.lock() = Instant::now();
    }

    pub(crate) fn record_rejected(&self, origin: &'static str) {
        self.updates_rejected
            .add(1, &[KeyValue::new("origin", origin)]);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.validation_failures.add(1, &[]);
    }

    pub(crate) fn record_broadcast(&self, report: BroadcastReport) {
        if report.dropped_slow > 0 {
            self.dropped_slow.add(report.dropped_slow as u64, &[]);
        }
    }

    pub(crate) fn update_subscriber_count(&self, count: usize) {
        self.active_subscribers
            .record(i64::try_from(count).unwrap_or(i64::MAX), &[]);
    }

    pub(crate) fn record_load_failure(&self, source_id: &str) {
        self.source_load_failures
            .add(1, &[KeyValue::new("source", source_id.to_string())]);
    }

    pub(crate) fn record_watch_failure(&self, source_id: &str) {
        self.source_watch_failures
            .add(1, &[KeyValue::new("source", source_id.to_string())]);
    }

    pub(crate) fn record_update_error(&self, source_id: &str) {
        self.source_update_errors
            .add(1, &[KeyValue::new("source", source_id.to_string())]);
    }

    #[cfg_attr(not(feature = "history"), allow(dead_code))]
    pub(crate) fn record_revert(&self) {
        self.reverts.add(1, &[]);
    }

    /// Update the configuration age metric.
    ///
    /// Call periodically to track how stale the configuration is.
    pub fn update_config_age(&self) {
        let age_secs = self.last_update.lock().elapsed().as_secs() as i64;
        self.config_age_seconds.record(age_secs, &[]);
    }
}

/// Records the duration of one update attempt, accepted or not, on drop.
pub(crate) struct UpdateTimer {
    histogram: Histogram<f64>,
    origin: &'static str,
    start: Instant,
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        self.histogram.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("origin", self.origin)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::global;

    #[test]
    fn test_metrics_recording() {
        let metrics = StoreMetrics::new(global::meter("test"));

        // Recording against the no-op global meter must not panic
        drop(metrics.start_update("manual"));
        metrics.record_accepted("manual", 1);
        metrics.record_rejected("source");
        metrics.record_validation_failure();
        metrics.record_broadcast(BroadcastReport {
            delivered: 2,
            dropped_slow: 1,
        });
        metrics.update_subscriber_count(2);
        metrics.record_load_failure("file:config.yaml");
        metrics.record_watch_failure("file:config.yaml");
        metrics.record_update_error("file:config.yaml");
        metrics.record_revert();
        metrics.update_config_age();
    }

    #[test]
    fn test_store_with_metrics() {
        let store = crate::core::ConfigStore::<i32>::builder()
            .with_metrics(global::meter("test"))
            .build();

        let sub = store.subscribe();
        assert_eq!(store.propose_update(3).unwrap(), 1);
        assert_eq!(store.subscriber_count(), 1);

        // Dropping goes through the registry listener, not the store.
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
    }
}
