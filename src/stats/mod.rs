//! Operational tallies shared between the ingest pipeline and the trace store

pub mod counter;
pub mod exporter;

pub use counter::Counter;
pub use exporter::{MetricLabels, MetricsExporter};

use serde::Serialize;

/// Counters owned by the trace store
#[derive(Debug)]
pub struct StoreCounters {
    /// Begin operations applied
    pub trace_set: Counter,
    /// SetSpan operations applied
    pub span_set: Counter,
    /// EndSpan operations applied
    pub span_close: Counter,
    /// Release operations applied
    pub trace_delete: Counter,
    /// Worker ids currently holding a record
    pub active_workers: Counter,
}

impl StoreCounters {
    pub fn new() -> Self {
        Self {
            trace_set: Counter::new("trace_set"),
            span_set: Counter::new("span_set"),
            span_close: Counter::new("all_span_close"),
            trace_delete: Counter::new("trace_delete"),
            active_workers: Counter::new("active_pid"),
        }
    }

    /// Reset the monotonic tallies. The active-worker gauge tracks live
    /// records and is left alone.
    pub fn reset(&self) {
        self.trace_set.reset();
        self.span_set.reset();
        self.span_close.reset();
        self.trace_delete.reset();
    }
}

impl Default for StoreCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters owned by the ingest pipeline
#[derive(Debug)]
pub struct IngestCounters {
    /// Datagrams read from any socket
    pub packets_captured: Counter,
    /// Packets taken off a queue and processed
    pub packets_parsed: Counter,
    /// Packets that failed to decode or carried an unknown method
    pub packets_rejected: Counter,
    /// Flush-and-replace events on a full queue
    pub queue_resets: Counter,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self {
            packets_captured: Counter::new("packages_caught"),
            packets_parsed: Counter::new("packages_parse"),
            packets_rejected: Counter::new("packages_rejected"),
            queue_resets: Counter::new("channel_reset"),
        }
    }

    pub fn reset(&self) {
        self.packets_captured.reset();
        self.packets_parsed.reset();
        self.packets_rejected.reset();
        self.queue_resets.reset();
    }
}

impl Default for IngestCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time read of every counter
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub trace_set: u64,
    pub span_set: u64,
    pub all_span_close: u64,
    pub trace_delete: u64,
    pub packages_caught: u64,
    pub packages_parse: u64,
    pub packages_rejected: u64,
    pub total_channel_reset: u64,
    pub count_active_pid: u64,
}

impl StatsSnapshot {
    pub fn collect(store: &StoreCounters, ingest: &IngestCounters) -> Self {
        Self {
            trace_set: store.trace_set.count(),
            span_set: store.span_set.count(),
            all_span_close: store.span_close.count(),
            trace_delete: store.trace_delete.count(),
            packages_caught: ingest.packets_captured.count(),
            packages_parse: ingest.packets_parsed.count(),
            packages_rejected: ingest.packets_rejected.count(),
            total_channel_reset: ingest.queue_resets.count(),
            count_active_pid: store.active_workers.count(),
        }
    }
}
