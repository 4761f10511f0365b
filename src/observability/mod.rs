//! Logs, counters and request spans.
//!
//! `logging` installs the `tracing` subscriber once at startup. `tracing`
//! builds the per-request span the transport opens around each exchange,
//! and the same `x-request-id` is re-entered on the worker thread that runs
//! the chain. `metrics` records request outcomes, cache hits and pool
//! saturation through the `metrics` facade; an exporter is only installed
//! when enabled in config.

pub mod logging;
pub mod metrics;
pub mod tracing;
