//! Request execution off the I/O tasks.
//!
//! Middleware and handlers are synchronous and may block, so every chain runs
//! on a `WorkerPool` thread while the connection task awaits the result.

pub mod pool;

pub use pool::WorkerPool;
