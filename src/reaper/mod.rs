//! Hung trace detection
//!
//! Traces that were never released are matched against the worker states
//! reported by an external status source and evicted when their worker has
//! exited or sits idle.

pub mod status;
pub mod worker;

pub use status::{parse_fpm_status, FpmStatusClient, StatusError, StatusSource, WorkerStatus, WorkerStatuses};
pub use worker::HungReaper;
