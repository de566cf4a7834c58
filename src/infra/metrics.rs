//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::epoch_ms;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Lock-free metrics collector
///
/// All recording operations are lock-free. `report()` atomically swaps the
/// per-interval counters to get a consistent snapshot.
pub struct Metrics {
    /// Total tag reads ever processed (monotonic)
    tags_total: AtomicU64,
    /// Tag reads since last report (reset on report)
    tags_since_report: AtomicU64,
    /// Report batches received (monotonic)
    batches_total: AtomicU64,
    /// Reads with an unclassifiable EPC length (monotonic)
    unknown_tags_total: AtomicU64,
    /// Pallet reads suppressed as duplicates (monotonic)
    duplicate_pallets_total: AtomicU64,
    /// Pallets registered for pairing (monotonic)
    pallets_registered_total: AtomicU64,
    /// Completed associations emitted (monotonic)
    completed_total: AtomicU64,
    /// Incomplete associations emitted (monotonic)
    incomplete_total: AtomicU64,
    /// Manually injected associations (monotonic)
    manual_total: AtomicU64,
    /// Report batches dropped because the engine channel was full (monotonic)
    reports_dropped_total: AtomicU64,
    /// Reader keepalives received (monotonic)
    keepalives_total: AtomicU64,
    /// Reader link drops observed (monotonic)
    link_drops_total: AtomicU64,
    /// Pallets currently awaiting pairing (gauge)
    pending_pallets: AtomicU64,
    /// Epoch ms of the last report, for rate computation
    last_report_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tags_total: AtomicU64::new(0),
            tags_since_report: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            unknown_tags_total: AtomicU64::new(0),
            duplicate_pallets_total: AtomicU64::new(0),
            pallets_registered_total: AtomicU64::new(0),
            completed_total: AtomicU64::new(0),
            incomplete_total: AtomicU64::new(0),
            manual_total: AtomicU64::new(0),
            reports_dropped_total: AtomicU64::new(0),
            keepalives_total: AtomicU64::new(0),
            link_drops_total: AtomicU64::new(0),
            pending_pallets: AtomicU64::new(0),
            last_report_ms: AtomicU64::new(epoch_ms()),
        }
    }

    pub fn record_batch(&self, tag_count: u64) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.tags_total.fetch_add(tag_count, Ordering::Relaxed);
        self.tags_since_report.fetch_add(tag_count, Ordering::Relaxed);
    }

    pub fn record_unknown_tag(&self) {
        self.unknown_tags_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_pallet(&self) {
        self.duplicate_pallets_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pallet_registered(&self) {
        self.pallets_registered_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_association_completed(&self) {
        self.completed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_association_incomplete(&self) {
        self.incomplete_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_manual_injection(&self) {
        self.manual_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_dropped(&self) {
        self.reports_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keepalive(&self) {
        self.keepalives_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_link_drop(&self) {
        self.link_drops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pending_pallets(&self, count: u64) {
        self.pending_pallets.store(count, Ordering::Relaxed);
    }

    pub fn tags_total(&self) -> u64 {
        self.tags_total.load(Ordering::Relaxed)
    }

    pub fn completed_total(&self) -> u64 {
        self.completed_total.load(Ordering::Relaxed)
    }

    pub fn incomplete_total(&self) -> u64 {
        self.incomplete_total.load(Ordering::Relaxed)
    }

    pub fn pending_pallets(&self) -> u64 {
        self.pending_pallets.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the per-interval ones
    pub fn report(&self) -> MetricsSummary {
        let now = epoch_ms();
        let last = self.last_report_ms.swap(now, Ordering::Relaxed);
        let elapsed_ms = now.saturating_sub(last).max(1);
        let tags_in_interval = self.tags_since_report.swap(0, Ordering::Relaxed);

        MetricsSummary {
            tags_total: self.tags_total.load(Ordering::Relaxed),
            tags_per_sec: tags_in_interval as f64 * 1000.0 / elapsed_ms as f64,
            batches_total: self.batches_total.load(Ordering::Relaxed),
            unknown_tags_total: self.unknown_tags_total.load(Ordering::Relaxed),
            duplicate_pallets_total: self.duplicate_pallets_total.load(Ordering::Relaxed),
            pallets_registered_total: self.pallets_registered_total.load(Ordering::Relaxed),
            completed_total: self.completed_total.load(Ordering::Relaxed),
            incomplete_total: self.incomplete_total.load(Ordering::Relaxed),
            manual_total: self.manual_total.load(Ordering::Relaxed),
            reports_dropped_total: self.reports_dropped_total.load(Ordering::Relaxed),
            keepalives_total: self.keepalives_total.load(Ordering::Relaxed),
            link_drops_total: self.link_drops_total.load(Ordering::Relaxed),
            pending_pallets: self.pending_pallets.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of the gateway counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub tags_total: u64,
    pub tags_per_sec: f64,
    pub batches_total: u64,
    pub unknown_tags_total: u64,
    pub duplicate_pallets_total: u64,
    pub pallets_registered_total: u64,
    pub completed_total: u64,
    pub incomplete_total: u64,
    pub manual_total: u64,
    pub reports_dropped_total: u64,
    pub keepalives_total: u64,
    pub link_drops_total: u64,
    pub pending_pallets: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            tags_total = %self.tags_total,
            tags_per_sec = %format!("{:.1}", self.tags_per_sec),
            batches = %self.batches_total,
            unknown = %self.unknown_tags_total,
            duplicates = %self.duplicate_pallets_total,
            registered = %self.pallets_registered_total,
            completed = %self.completed_total,
            incomplete = %self.incomplete_total,
            manual = %self.manual_total,
            dropped = %self.reports_dropped_total,
            keepalives = %self.keepalives_total,
            link_drops = %self.link_drops_total,
            pending = %self.pending_pallets,
            "metrics_report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_batch(3);
        metrics.record_batch(2);
        metrics.record_pallet_registered();
        metrics.record_association_completed();
        metrics.record_association_incomplete();
        metrics.set_pending_pallets(4);

        let summary = metrics.report();
        assert_eq!(summary.tags_total, 5);
        assert_eq!(summary.batches_total, 2);
        assert_eq!(summary.pallets_registered_total, 1);
        assert_eq!(summary.completed_total, 1);
        assert_eq!(summary.incomplete_total, 1);
        assert_eq!(summary.pending_pallets, 4);
    }

    #[test]
    fn test_interval_counter_resets_on_report() {
        let metrics = Metrics::new();
        metrics.record_batch(10);

        let first = metrics.report();
        assert!(first.tags_per_sec >= 0.0);

        // Interval counter was swapped out; totals are monotonic
        let second = metrics.report();
        assert_eq!(second.tags_total, 10);
        assert_eq!(second.tags_per_sec, 0.0);
    }
}
