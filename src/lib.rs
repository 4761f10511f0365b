//! Embeddable HTTP micro-server: servlet-style middleware pipelines,
//! a bounded worker pool, and a cached static resource tier.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod worker;

pub use config::ServerConfig;
pub use context::ServerContext;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
