//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → MiddlewareFactories → PipelineRegistry → deploy → ServerContext → HttpServer
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop exits → connections drain → worker pool joins
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → HttpServer::stop
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then pipeline, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: connections get the grace period, then are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::build_server;
