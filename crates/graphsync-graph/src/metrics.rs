//! Counters emitted by the engine.

use std::time::Duration;

/// Destination for engine counters and timings.
///
/// Implementations must be cheap; they are called inline on the write path.
pub trait MetricsSink: Send + Sync {
    fn incr(&self, key: &str, by: u64);

    fn timing(&self, _key: &str, _elapsed: Duration) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _key: &str, _by: u64) {}
}

/// Emits every counter and timing as a DEBUG event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn incr(&self, key: &str, by: u64) {
        tracing::debug!(metric = key, by, "counter");
    }

    fn timing(&self, key: &str, elapsed: Duration) {
        tracing::debug!(metric = key, elapsed_ms = elapsed.as_millis() as u64, "timing");
    }
}

pub(crate) const RETRY_NETWORK: &str = "graphsync.retry.network";
pub(crate) const RETRY_ENTITY_NOT_FOUND: &str = "graphsync.retry.entity_not_found";
pub(crate) const RECOVERED_NETWORK: &str = "graphsync.recovered.network";
pub(crate) const RECOVERED_ENTITY_NOT_FOUND: &str = "graphsync.recovered.entity_not_found";
pub(crate) const BATCHES_WRITTEN: &str = "graphsync.load.batches";
pub(crate) const RECORDS_WRITTEN: &str = "graphsync.load.records";
pub(crate) const LOAD_TIME: &str = "graphsync.load.time";
pub(crate) const CLEANUP_DELETED: &str = "graphsync.cleanup.deleted";
