use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// State held for one worker id during a single trace epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Identity of the current epoch
    pub trace_id: String,
    /// Send time of the last accepted event
    pub last_event_at: DateTime<FixedOffset>,
    /// Packet that opened the trace, set only by Begin
    pub trace: Option<Vec<u8>>,
    /// Packet describing the current span, cleared when the span closes
    pub span: Option<Vec<u8>>,
}

impl TraceRecord {
    pub fn new(trace_id: impl Into<String>, last_event_at: DateTime<FixedOffset>) -> Self {
        Self {
            trace_id: trace_id.into(),
            last_event_at,
            trace: None,
            span: None,
        }
    }

    pub fn is_same_trace(&self, trace_id: &str) -> bool {
        self.trace_id == trace_id
    }

    /// Whether `at` strictly follows the last accepted event
    pub fn is_advanced_by(&self, at: &DateTime<FixedOffset>) -> bool {
        self.last_event_at < *at
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        TraceSnapshot {
            trace_id: self.trace_id.clone(),
            sent_at: self.last_event_at,
            trace: self.trace.as_deref().and_then(payload_to_json),
            span: self.span.as_deref().and_then(payload_to_json),
            context: None,
            tags: None,
        }
    }
}

/// Serializable copy of a [`TraceRecord`]
///
/// `context` and `tags` are part of the view consumed by the debug endpoint
/// but no store operation fills them.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceSnapshot {
    pub trace_id: String,
    pub sent_at: DateTime<FixedOffset>,
    pub trace: Option<serde_json::Value>,
    pub span: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub tags: Option<serde_json::Value>,
}

fn payload_to_json(bytes: &[u8]) -> Option<serde_json::Value> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::trace!(error = %e, "Stored payload is not valid JSON");
            None
        }
    }
}
