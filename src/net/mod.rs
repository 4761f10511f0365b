//! Socket plumbing below the HTTP layer.
//!
//! ```text
//! listener.rs    bind with an explicit backlog, one slot per open connection
//! tls.rs         optional rustls handshake, run inside the connection task
//! connection.rs  open-connection count that `HttpServer::stop` drains on
//! ```

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
