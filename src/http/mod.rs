//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept loop, hyper HTTP/1.1 driver, request-id + trace layers)
//!     → dispatch.rs (method gate, body limit, static resolution, worker pool)
//!     → request.rs (context path stripped, query parsed)
//!     → pipeline chain → terminal handler
//!     → response.rs (status, headers, buffered body)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod request;
pub mod response;
pub mod server;

pub use dispatch::{Dispatcher, NotFoundHandler, StaticHandler};
pub use request::{Request, RequestUuid, X_REQUEST_ID};
pub use response::Response;
pub use server::HttpServer;

/// Transport lifecycle.
///
/// ```text
/// Stopped → Starting → Listening → Draining → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Draining,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Listening => "listening",
            ServerState::Draining => "draining",
        };
        f.write_str(name)
    }
}
