//! Metrics hooks for the journal.
//!
//! The journal reports counters, gauges, and timings through a sink
//! supplied by the embedding process. Transport (Prometheus or otherwise)
//! lives outside this crate.

use std::time::Duration;

/// Sink for journal metrics.
///
/// All methods are called from journal operations and must be cheap and
/// non-blocking.
pub trait MetricsSink: Send + Sync {
    /// An append completed, writing `bytes` frame bytes.
    fn record_append(&self, bytes: usize, latency: Duration);

    /// A segment roll completed (sealing the old segment and creating the
    /// next one).
    fn observe_segment_roll(&self, latency: Duration);

    /// A truncation (`delete_after` or `reset`) completed.
    fn observe_segment_truncation(&self, latency: Duration);

    /// Number of live segments changed.
    fn set_segment_count(&self, count: usize);

    /// First retained index changed.
    fn set_first_index(&self, index: u64);

    /// Last written index changed.
    fn set_last_index(&self, index: u64);
}

/// A sink that discards all metrics. Used when no sink is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_append(&self, _bytes: usize, _latency: Duration) {}

    fn observe_segment_roll(&self, _latency: Duration) {}

    fn observe_segment_truncation(&self, _latency: Duration) {}

    fn set_segment_count(&self, _count: usize) {}

    fn set_first_index(&self, _index: u64) {}

    fn set_last_index(&self, _index: u64) {}
}
