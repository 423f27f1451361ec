use chrono::{DateTime, FixedOffset, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::record::{TraceRecord, TraceSnapshot};
use crate::reaper::WorkerStatuses;
use crate::stats::StoreCounters;

/// Worker state reported for a process that is free for new requests
pub const IDLE_STATE: &str = "Idle";

/// In-memory trace state keyed by worker id
///
/// Every lifecycle operation runs under the map's per-key entry lock, so the
/// checks and the mutation that follows them are atomic for one worker id.
/// The active-worker gauge is adjusted while that lock is held.
pub struct TraceStore {
    records: DashMap<String, TraceRecord>,
    counters: Arc<StoreCounters>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::with_counters(Arc::new(StoreCounters::new()))
    }

    pub fn with_counters(counters: Arc<StoreCounters>) -> Self {
        Self {
            records: DashMap::new(),
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<StoreCounters> {
        &self.counters
    }

    /// Open a trace for a worker, or refresh the trace payload of the current one
    pub fn begin(
        &self,
        worker_id: &str,
        trace_id: &str,
        at: DateTime<FixedOffset>,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.counters.trace_set.increment();

        match self.records.entry(worker_id.to_owned()) {
            Entry::Vacant(entry) => {
                let mut record = TraceRecord::new(trace_id, at);
                record.trace = Some(payload);
                self.counters.active_workers.increment();
                entry.insert(record);
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if !record.is_same_trace(trace_id) {
                    check_order(record, Operation::Begin, worker_id, &at)?;
                    tracing::debug!(
                        worker_id = %worker_id,
                        old_trace_id = %record.trace_id,
                        trace_id = %trace_id,
                        "New trace without releasing the previous one"
                    );
                    self.replace_epoch(record, trace_id, at);
                }
                // Same epoch: only the payload moves, the clock stays put.
                record.trace = Some(payload);
            }
        }

        Ok(())
    }

    /// Set the current span of a worker's trace
    pub fn set_span(
        &self,
        worker_id: &str,
        trace_id: &str,
        at: DateTime<FixedOffset>,
        payload: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.counters.span_set.increment();

        match self.records.entry(worker_id.to_owned()) {
            Entry::Vacant(entry) => {
                let mut record = TraceRecord::new(trace_id, at);
                record.span = Some(payload);
                self.counters.active_workers.increment();
                entry.insert(record);
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                check_order(record, Operation::SetSpan, worker_id, &at)?;
                if !record.is_same_trace(trace_id) {
                    tracing::debug!(
                        worker_id = %worker_id,
                        old_trace_id = %record.trace_id,
                        trace_id = %trace_id,
                        "Span for a new trace without releasing the previous one"
                    );
                    self.replace_epoch(record, trace_id, at);
                }
                record.last_event_at = at;
                record.span = Some(payload);
            }
        }

        Ok(())
    }

    /// Close the current span of a worker's trace
    pub fn end_span(
        &self,
        worker_id: &str,
        trace_id: &str,
        at: DateTime<FixedOffset>,
    ) -> Result<(), StoreError> {
        self.counters.span_close.increment();

        if let Entry::Occupied(mut entry) = self.records.entry(worker_id.to_owned()) {
            let record = entry.get_mut();
            check_order(record, Operation::EndSpan, worker_id, &at)?;
            if record.is_same_trace(trace_id) {
                record.span = None;
            } else {
                tracing::debug!(
                    worker_id = %worker_id,
                    old_trace_id = %record.trace_id,
                    trace_id = %trace_id,
                    "Span closed for a foreign trace, dropping the record"
                );
                self.counters.active_workers.decrement();
                entry.remove();
            }
        }

        Ok(())
    }

    /// Drop a worker's trace
    pub fn release(
        &self,
        worker_id: &str,
        trace_id: &str,
        at: DateTime<FixedOffset>,
    ) -> Result<(), StoreError> {
        self.counters.trace_delete.increment();

        if let Entry::Occupied(entry) = self.records.entry(worker_id.to_owned()) {
            let record = entry.get();
            check_order(record, Operation::Release, worker_id, &at)?;
            if !record.is_same_trace(trace_id) {
                tracing::debug!(
                    worker_id = %worker_id,
                    old_trace_id = %record.trace_id,
                    trace_id = %trace_id,
                    "Release names a different trace, dropping the record anyway"
                );
            }
            self.counters.active_workers.decrement();
            entry.remove();
        }

        Ok(())
    }

    /// Copy of every active record
    ///
    /// Shards are visited one at a time, so concurrent writers may land
    /// between keys.
    pub fn get_all(&self) -> HashMap<String, TraceSnapshot> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    pub fn get(&self, worker_id: &str) -> Option<TraceRecord> {
        self.records.get(worker_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Evict records of workers that are gone or idle
    ///
    /// Only records whose last event is at least `stale_after` old are looked
    /// up in `statuses`. Returns the number of evicted records.
    pub fn reap_hung(
        &self,
        statuses: &WorkerStatuses,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let stale_after = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX);
        let mut reaped = 0;

        self.records.retain(|worker_id, record| {
            let age = now.signed_duration_since(record.last_event_at.with_timezone(&Utc));
            if age < stale_after {
                return true;
            }
            tracing::trace!(worker_id = %worker_id, age_secs = age.num_seconds(), "Checking stale trace");

            let keep = match statuses.get(worker_id) {
                None => {
                    tracing::debug!(
                        worker_id = %worker_id,
                        trace_id = %record.trace_id,
                        "Worker is gone, dropping its trace"
                    );
                    false
                }
                Some(status) if status.state == IDLE_STATE => {
                    tracing::debug!(
                        worker_id = %worker_id,
                        trace_id = %record.trace_id,
                        "Worker is idle with an open trace, dropping it"
                    );
                    false
                }
                Some(_) => true,
            };

            if !keep {
                self.counters.active_workers.decrement();
                reaped += 1;
            }
            keep
        });

        reaped
    }

    /// Swap in a fresh record for a new trace id, keeping the gauge balanced
    fn replace_epoch(&self, record: &mut TraceRecord, trace_id: &str, at: DateTime<FixedOffset>) {
        self.counters.active_workers.decrement();
        *record = TraceRecord::new(trace_id, at);
        self.counters.active_workers.increment();
    }
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_order(
    record: &TraceRecord,
    operation: Operation,
    worker_id: &str,
    at: &DateTime<FixedOffset>,
) -> Result<(), StoreError> {
    if record.is_advanced_by(at) {
        return Ok(());
    }
    Err(StoreError::Chronological {
        operation,
        worker_id: worker_id.to_owned(),
        last_event_at: record.last_event_at,
        at: *at,
    })
}

/// Store operation, used to label errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Begin,
    SetSpan,
    EndSpan,
    Release,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Begin => "set trace",
            Operation::SetSpan => "set span",
            Operation::EndSpan => "delete span",
            Operation::Release => "delete trace",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("skip {operation} command for {worker_id}: message history is broken ({at} is not after {last_event_at})")]
    Chronological {
        operation: Operation,
        worker_id: String,
        last_event_at: DateTime<FixedOffset>,
        at: DateTime<FixedOffset>,
    },
}
