//! Wire format of worker events
//!
//! One datagram carries one JSON object:
//!
//! ```json
//! {"pid": "2905890", "method": "init-trace", "traceId": "0bbf9e15-...",
//!  "sentAt": "2023-04-10T14:04:31.367337+03:00", "data": {...}}
//! ```

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt;

/// Lifecycle method named by an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// `init-trace`
    Begin,
    /// `set-trace-current-span`, with a payload to open a span or `null` to close it
    UpdateSpan,
    /// `free-pid`
    Release,
    /// Anything else; rejected when the event is applied
    Unknown(String),
}

impl Method {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "init-trace" => Method::Begin,
            "set-trace-current-span" => Method::UpdateSpan,
            "free-pid" => Method::Release,
            other => Method::Unknown(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Method::Begin => "init-trace",
            Method::UpdateSpan => "set-trace-current-span",
            Method::Release => "free-pid",
            Method::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// An event decoded from one datagram
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub worker_id: String,
    pub method: Method,
    pub trace_id: String,
    pub sent_at: DateTime<FixedOffset>,
    /// Raw JSON of `data`, `None` when absent or `null`
    pub payload: Option<Vec<u8>>,
    /// The datagram exactly as received
    pub raw: Vec<u8>,
}

/// Datagram layout
///
/// `pid`, `method`, `traceId` and `sentAt` are required. A datagram missing
/// one of them is rejected here as malformed instead of being read as
/// zero values and left for the ordering check to refuse.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    pid: String,
    method: String,
    trace_id: String,
    sent_at: DateTime<FixedOffset>,
    #[serde(default, borrow)]
    data: Option<&'a RawValue>,
}

impl InboundEvent {
    /// Decode a datagram, keeping the original bytes
    pub fn decode(raw: Vec<u8>) -> Result<Self, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (worker_id, method, trace_id, sent_at, payload) = {
            let wire: WireEvent<'_> = serde_json::from_slice(&raw)?;
            (
                wire.pid,
                Method::from_wire(&wire.method),
                wire.trace_id,
                wire.sent_at,
                wire.data.map(|data| data.get().as_bytes().to_vec()),
            )
        };

        Ok(Self {
            worker_id,
            method,
            trace_id,
            sent_at,
            payload,
            raw,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty packet")]
    Empty,

    #[error("malformed packet: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAN_PACKET: &str = r#"{"method":"set-trace-current-span","sentAt":"2023-04-10T14:04:31.387230+03:00","pid":"2905890","traceId":"0bbf9e15-519d-4e4f-af14-eb4caa40e88b","data":{"span":{"id":"b17482a2-5694-434b-9133-8c3c6ee81a0d","parent":null,"openedAt":"2023-04-10T14:04:31.387220+03:00","name":"Database query","context":{"query":"select * from \"available_for_rent_cars\" where \"available_for_rent_cars\".\"id\" = ? limit 1","bindings":[9123]},"tags":[]},"parentSpans":[]}}"#;

    #[test]
    fn test_decode_empty_packet() {
        assert!(matches!(InboundEvent::decode(Vec::new()), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            InboundEvent::decode(br#"{"invalid json"}"#.to_vec()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_missing_fields() {
        let packet = br#"{"method":"free-pid","pid":"1","traceId":"t"}"#.to_vec();
        assert!(matches!(InboundEvent::decode(packet), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_bad_timestamp() {
        let packet =
            br#"{"method":"free-pid","pid":"1","traceId":"t","sentAt":"yesterday","data":null}"#.to_vec();
        assert!(matches!(InboundEvent::decode(packet), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_span_packet() {
        let raw = SPAN_PACKET.as_bytes().to_vec();

        let event = InboundEvent::decode(raw.clone()).unwrap();

        assert_eq!(event.raw, raw);
        assert_eq!(event.worker_id, "2905890");
        assert_eq!(event.method, Method::UpdateSpan);
        assert_eq!(event.trace_id, "0bbf9e15-519d-4e4f-af14-eb4caa40e88b");
        assert_eq!(
            event.sent_at.format("%Y-%m-%dT%H:%M:%S%.6f%:z").to_string(),
            "2023-04-10T14:04:31.387230+03:00"
        );

        let payload: serde_json::Value = serde_json::from_slice(&event.payload.unwrap()).unwrap();
        assert_eq!(payload["span"]["name"], "Database query");
    }

    #[test]
    fn test_decode_null_and_missing_data() {
        let closed = br#"{"method":"set-trace-current-span","sentAt":"2023-04-10T14:04:31.376382+03:00","pid":"2905890","traceId":"t","data":null}"#;
        let event = InboundEvent::decode(closed.to_vec()).unwrap();
        assert!(event.payload.is_none());

        let missing = br#"{"method":"free-pid","sentAt":"2023-04-10T14:04:31.376382+03:00","pid":"2905890","traceId":"t"}"#;
        let event = InboundEvent::decode(missing.to_vec()).unwrap();
        assert!(event.payload.is_none());
        assert_eq!(event.method, Method::Release);
    }

    #[test]
    fn test_decode_keeps_unknown_method() {
        let packet = br#"{"method":"set-current-span","sentAt":"2023-04-10T14:04:31.376382+03:00","pid":"1","traceId":"t","data":null}"#;
        let event = InboundEvent::decode(packet.to_vec()).unwrap();
        assert_eq!(event.method, Method::Unknown("set-current-span".to_string()));
        assert_eq!(event.method.to_string(), "set-current-span");
    }
}
