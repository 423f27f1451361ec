//! Ingest of worker events over UDP
//!
//! Datagrams flow socket -> per-port queue -> decode -> trace store.

pub mod event;
pub mod listener;
pub mod pipeline;
pub mod queue;

pub use event::{DecodeError, InboundEvent, Method};
pub use listener::{IngestError, ListenerBank};
pub use pipeline::{ApplyError, Pipeline};
pub use queue::{PacketQueue, QueueError};
