pub mod engine;
pub mod record;

pub use engine::{Operation, StoreError, TraceStore, IDLE_STATE};
pub use record::{TraceRecord, TraceSnapshot};
