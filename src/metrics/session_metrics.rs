//! Watch session metrics using OpenTelemetry.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for a watch session.
///
/// Tracks observations by outcome, processing latency, feed failures, snapshot
/// age, and subscriber counts.
///
/// # Examples
///
/// ```rust,no_run
/// use kvwatch_config::metrics::SessionMetrics;
/// use opentelemetry::global;
///
/// let meter = global::meter("kvwatch-config");
/// let metrics = SessionMetrics::new(meter);
///
/// let timer = metrics.start_observation();
/// // ... merge, diff, check policy ...
/// metrics.record_delivered(timer);
/// ```
#[derive(Clone)]
pub struct SessionMetrics {
    observations: Counter<u64>,
    outcomes: Counter<u64>,
    processing_duration: Histogram<f64>,
    feed_errors: Counter<u64>,
    snapshot_age_seconds: Gauge<i64>,
    active_subscribers: Gauge<i64>,
    last_delivery: Arc<parking_lot::Mutex<Instant>>,
}

impl SessionMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let observations = meter
            .u64_counter("kvwatch.observations")
            .with_description("Total number of observations received from the feed")
            .build();

        let outcomes = meter
            .u64_counter("kvwatch.observations.outcome")
            .with_description("Observations by outcome (delivered, skipped, fatal, dropped)")
            .build();

        let processing_duration = meter
            .f64_histogram("kvwatch.observation.duration")
            .with_description("Time to merge, diff, and check one observation in seconds")
            .with_unit("s")
            .build();

        let feed_errors = meter
            .u64_counter("kvwatch.feed.errors")
            .with_description("Number of transport errors reported by the feed")
            .build();

        let snapshot_age_seconds = meter
            .i64_gauge("kvwatch.snapshot.age")
            .with_description("Time since the last delivered snapshot in seconds")
            .with_unit("s")
            .build();

        let active_subscribers = meter
            .i64_gauge("kvwatch.subscribers.active")
            .with_description("Number of active subscribers")
            .build();

        Self {
            observations,
            outcomes,
            processing_duration,
            feed_errors,
            snapshot_age_seconds,
            active_subscribers,
            last_delivery: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    /// Count an observation and start its timer.
    ///
    /// Pass the returned `Instant` to one of the `record_*` methods.
    pub fn start_observation(&self) -> Instant {
        self.observations.add(1, &[]);
        Instant::now()
    }

    /// Record an observation that reached subscribers.
    pub fn record_delivered(&self, start: Instant) {
        self.finish(start, "delivered");
        *self.last_delivery.lock() = Instant::now();
    }

    /// Record an observation withheld by the `skip` policy.
    pub fn record_skipped(&self, start: Instant) {
        self.finish(start, "skipped");
    }

    /// Record an observation that halted the session.
    pub fn record_fatal(&self, start: Instant) {
        self.finish(start, "fatal");
    }

    /// Record an observation dropped for a non-success status.
    pub fn record_dropped(&self) {
        self.observations.add(1, &[]);
        self.outcomes.add(1, &[KeyValue::new("outcome", "dropped")]);
    }

    /// Record a transport error from the feed.
    pub fn record_feed_error(&self) {
        self.feed_errors.add(1, &[]);
    }

    /// Update the number of active subscribers.
    pub fn update_subscriber_count(&self, count: i64) {
        self.active_subscribers.record(count, &[]);
    }

    /// Update the snapshot age metric.
    ///
    /// Call periodically to track how stale the delivered snapshot is.
    pub fn update_snapshot_age(&self) {
        let age_secs = self.last_delivery.lock().elapsed().as_secs() as i64;
        self.snapshot_age_seconds.record(age_secs, &[]);
    }

    fn finish(&self, start: Instant, outcome: &'static str) {
        let attrs = [KeyValue::new("outcome", outcome)];
        self.outcomes.add(1, &attrs);
        self.processing_duration
            .record(start.elapsed().as_secs_f64(), &attrs);
    }
}
