//! Trace Collector: live trace state for short-lived worker processes
//!
//! Workers report the lifecycle of each request over UDP: a trace opens, its
//! current span changes as the request runs, and the worker releases the
//! trace when the request ends. The collector keeps the latest state per
//! worker in memory and reaps traces whose worker died or went idle without
//! releasing them.
//!
//! # Features
//!
//! - **UDP Listener Bank**: One socket, queue and consumer per configured port
//! - **Freshness-First Backpressure**: A full queue is flushed and restarted
//! - **Trace Store**: Per-worker lifecycle state with ordering and identity checks
//! - **Hung Reaper**: Periodic sweep against the worker status page
//! - **Supervision**: Failed tasks are logged and restarted
//! - **Metrics**: Counters exported in Prometheus text format
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trace_collector::{Pipeline, TraceStore};
//!
//! let pipeline = Pipeline::new(Arc::new(TraceStore::new()));
//!
//! pipeline.process_packet(
//!     0,
//!     br#"{"pid":"42","method":"init-trace","traceId":"t1","sentAt":"2023-04-10T14:04:31.367337+03:00","data":{}}"#.to_vec(),
//! );
//!
//! println!("Active workers: {}", pipeline.stats().count_active_pid);
//! ```

pub mod api;
pub mod config;
pub mod ingest;
pub mod reaper;
pub mod stats;
pub mod store;
pub mod supervisor;

// Re-export commonly used types
pub use config::{CollectorConfig, ConfigError};
pub use ingest::{InboundEvent, ListenerBank, Method, Pipeline};
pub use reaper::{FpmStatusClient, HungReaper, StatusSource, WorkerStatuses};
pub use stats::{Counter, StatsSnapshot};
pub use store::{StoreError, TraceRecord, TraceStore};
pub use supervisor::{ShutdownSignal, Supervisor};
