//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Monotonic counters are never reset; the decision latency histogram is
//! swapped to zero on each report.
//!
//! NOTE: All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64) * percentile).ceil() as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            // Overflow bucket reports twice the last bound
            return BUCKET_BOUNDS.get(i).copied().unwrap_or(BUCKET_BOUNDS[9] * 2);
        }
    }
    BUCKET_BOUNDS[9] * 2
}

/// Lock-free metrics collector for the scan pipeline
pub struct Metrics {
    /// Frames read from the frame source
    frames_sampled: AtomicU64,
    /// Frames in which a token was found
    tokens_decoded: AtomicU64,
    /// Candidate readings handed to the state machine
    readings_emitted: AtomicU64,
    /// Tokens dropped by the decode cooldown
    readings_deduplicated: AtomicU64,
    /// Decoded tokens discarded because the scanner was deactivated mid-decode
    readings_discarded: AtomicU64,
    /// Frame source acquisition failures
    acquisition_failures: AtomicU64,
    outcome_new_event: AtomicU64,
    outcome_suppressed: AtomicU64,
    outcome_complete: AtomicU64,
    outcome_unknown: AtomicU64,
    arrivals_total: AtomicU64,
    departures_total: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    /// Side effects dropped because the queue was full
    notifications_dropped: AtomicU64,
    /// Decision latency histogram (reset on report)
    decision_latency_buckets: [AtomicU64; NUM_BUCKETS],
    decision_latency_sum_us: AtomicU64,
    decision_latency_max_us: AtomicU64,
    decisions_since_report: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_sampled: AtomicU64::new(0),
            tokens_decoded: AtomicU64::new(0),
            readings_emitted: AtomicU64::new(0),
            readings_deduplicated: AtomicU64::new(0),
            readings_discarded: AtomicU64::new(0),
            acquisition_failures: AtomicU64::new(0),
            outcome_new_event: AtomicU64::new(0),
            outcome_suppressed: AtomicU64::new(0),
            outcome_complete: AtomicU64::new(0),
            outcome_unknown: AtomicU64::new(0),
            arrivals_total: AtomicU64::new(0),
            departures_total: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            decision_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            decision_latency_sum_us: AtomicU64::new(0),
            decision_latency_max_us: AtomicU64::new(0),
            decisions_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_frame_sampled(&self) {
        self.frames_sampled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_token_decoded(&self) {
        self.tokens_decoded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading_emitted(&self) {
        self.readings_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading_deduplicated(&self) {
        self.readings_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading_discarded(&self) {
        self.readings_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition_failure(&self) {
        self.acquisition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome_new_event(&self) {
        self.outcome_new_event.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome_suppressed(&self) {
        self.outcome_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome_complete(&self) {
        self.outcome_complete.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome_unknown(&self) {
        self.outcome_unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_arrival(&self) {
        self.arrivals_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_departure(&self) {
        self.departures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long a single state machine decision took
    #[inline]
    pub fn record_decision_latency(&self, latency_us: u64) {
        self.decision_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.decision_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.decision_latency_max_us, latency_us);
        self.decisions_since_report.fetch_add(1, Ordering::Relaxed);
    }

    pub fn readings_emitted(&self) -> u64 {
        self.readings_emitted.load(Ordering::Relaxed)
    }

    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the latency histogram
    pub fn report(&self) -> MetricsSummary {
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };

        let buckets = swap_buckets(&self.decision_latency_buckets);
        let decisions = self.decisions_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.decision_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.decision_latency_max_us.swap(0, Ordering::Relaxed);

        MetricsSummary {
            frames_sampled: self.frames_sampled.load(Ordering::Relaxed),
            tokens_decoded: self.tokens_decoded.load(Ordering::Relaxed),
            readings_emitted: self.readings_emitted.load(Ordering::Relaxed),
            readings_deduplicated: self.readings_deduplicated.load(Ordering::Relaxed),
            readings_discarded: self.readings_discarded.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
            outcome_new_event: self.outcome_new_event.load(Ordering::Relaxed),
            outcome_suppressed: self.outcome_suppressed.load(Ordering::Relaxed),
            outcome_complete: self.outcome_complete.load(Ordering::Relaxed),
            outcome_unknown: self.outcome_unknown.load(Ordering::Relaxed),
            arrivals_total: self.arrivals_total.load(Ordering::Relaxed),
            departures_total: self.departures_total.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            decisions_per_sec: if elapsed_secs > 0.0 {
                decisions as f64 / elapsed_secs
            } else {
                0.0
            },
            decision_avg_us: if decisions > 0 { latency_sum / decisions } else { 0 },
            decision_max_us: latency_max,
            decision_p50_us: percentile_from_buckets(&buckets, 0.50),
            decision_p99_us: percentile_from_buckets(&buckets, 0.99),
            decision_buckets: buckets,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_sampled: u64,
    pub tokens_decoded: u64,
    pub readings_emitted: u64,
    pub readings_deduplicated: u64,
    pub readings_discarded: u64,
    pub acquisition_failures: u64,
    pub outcome_new_event: u64,
    pub outcome_suppressed: u64,
    pub outcome_complete: u64,
    pub outcome_unknown: u64,
    pub arrivals_total: u64,
    pub departures_total: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notifications_dropped: u64,
    pub decisions_per_sec: f64,
    pub decision_avg_us: u64,
    pub decision_max_us: u64,
    pub decision_p50_us: u64,
    pub decision_p99_us: u64,
    /// Decision latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub decision_buckets: [u64; NUM_BUCKETS],
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames = %self.frames_sampled,
            decoded = %self.tokens_decoded,
            readings = %self.readings_emitted,
            deduplicated = %self.readings_deduplicated,
            discarded = %self.readings_discarded,
            new_events = %self.outcome_new_event,
            suppressed = %self.outcome_suppressed,
            complete = %self.outcome_complete,
            unknown = %self.outcome_unknown,
            arrivals = %self.arrivals_total,
            departures = %self.departures_total,
            notify_sent = %self.notifications_sent,
            notify_failed = %self.notifications_failed,
            notify_dropped = %self.notifications_dropped,
            decisions_per_sec = format!("{:.2}", self.decisions_per_sec),
            decision_p99_us = %self.decision_p99_us,
            "metrics"
        );
    }
}
