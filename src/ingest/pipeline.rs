use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::event::{DecodeError, InboundEvent, Method};
use crate::stats::{IngestCounters, StatsSnapshot};
use crate::store::{StoreError, TraceStore};

/// Shared context for every ingest task: the trace store and the tallies
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<TraceStore>,
    counters: Arc<IngestCounters>,
}

impl Pipeline {
    pub fn new(store: Arc<TraceStore>) -> Self {
        Self {
            store,
            counters: Arc::new(IngestCounters::new()),
        }
    }

    pub fn store(&self) -> &Arc<TraceStore> {
        &self.store
    }

    pub fn counters(&self) -> &Arc<IngestCounters> {
        &self.counters
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::collect(self.store.counters(), &self.counters)
    }

    /// Reset every tally owned by the pipeline and the store
    pub fn reset_counters(&self) {
        self.counters.reset();
        self.store.counters().reset();
    }

    /// Decode and apply one packet
    ///
    /// Failures, panics included, are logged and counted; they never reach
    /// the caller.
    pub fn process_packet(&self, port_offset: usize, packet: Vec<u8>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.decode_and_apply(port_offset, packet)));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if e.is_rejection() {
                    self.counters.packets_rejected.increment();
                }
                tracing::debug!(port_offset, error = %e, "Packet skipped");
            }
            Err(panic) => {
                self.counters.packets_rejected.increment();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(port_offset, panic = %message, "Packet processing panicked");
            }
        }

        self.counters.packets_parsed.increment();
    }

    fn decode_and_apply(&self, port_offset: usize, packet: Vec<u8>) -> Result<(), ApplyError> {
        let event = InboundEvent::decode(packet)?;

        tracing::trace!(
            port_offset,
            worker_id = %event.worker_id,
            method = %event.method,
            trace_id = %event.trace_id,
            sent_at = %event.sent_at,
            "Read event"
        );

        self.apply(event)
    }

    /// Route a decoded event to the matching store operation
    ///
    /// Begin and SetSpan store the whole packet as their payload.
    pub fn apply(&self, event: InboundEvent) -> Result<(), ApplyError> {
        let InboundEvent {
            worker_id,
            method,
            trace_id,
            sent_at,
            payload,
            raw,
        } = event;

        match method {
            Method::Begin => self.store.begin(&worker_id, &trace_id, sent_at, raw)?,
            Method::UpdateSpan if payload.is_some() => {
                self.store.set_span(&worker_id, &trace_id, sent_at, raw)?
            }
            Method::UpdateSpan => self.store.end_span(&worker_id, &trace_id, sent_at)?,
            Method::Release => self.store.release(&worker_id, &trace_id, sent_at)?,
            Method::Unknown(name) => return Err(ApplyError::UnknownMethod(name)),
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("unknown method specified in UDP packet: {0}")]
    UnknownMethod(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyError {
    /// Whether the packet itself was unusable, as opposed to out of order
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApplyError::Decode(_) | ApplyError::UnknownMethod(_))
    }
}
