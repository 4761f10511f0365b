//! Error taxonomy shared by the pipeline, cache and transport layers.
//!
//! # Design Decisions
//! - Setup failures (`ConfigurationError`) are fatal and surface to the caller
//! - Per-request failures never crash a connection; they map to a status code
//! - Middleware and handler code speaks `BoxError` so callers can use `?` freely

use axum::http::StatusCode;
use thiserror::Error;

/// Boxed error returned across the middleware and handler boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid pipeline setup: malformed mapping, unknown id, mutation after deploy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The registry was already deployed and is read-only.
    #[error("pipeline already deployed; cannot {0}")]
    AlreadyDeployed(&'static str),

    /// A middleware id was re-registered after deploy with a different implementation.
    #[error("middleware '{0}' is already bound to a different implementation")]
    ConflictingMiddleware(String),

    /// A mapping references a middleware id that was never registered.
    #[error("mapping references unknown middleware '{0}'")]
    UnknownMiddleware(String),

    /// A mapping must name exactly one of url pattern / handler name.
    #[error("mapping for '{0}' must specify exactly one of url_pattern or handler_name")]
    AmbiguousTarget(String),

    /// The url pattern can never match or is syntactically invalid.
    #[error("invalid url pattern '{pattern}' in mapping for '{middleware}'")]
    InvalidPattern { middleware: String, pattern: String },

    /// No factory is registered for a configured middleware kind.
    #[error("no middleware factory for kind '{0}'")]
    UnknownKind(String),

    /// A factory rejected its configuration.
    #[error("middleware '{name}' could not be built: {reason}")]
    Factory { name: String, reason: String },

    /// Context name or path is malformed.
    #[error("invalid context: {0}")]
    InvalidContext(String),
}

/// Failure to decode or accept an incoming request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Status code written back to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProtocolError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProtocolError::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Failure raised while executing a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A middleware returned an error; the rest of the chain was skipped.
    #[error("middleware '{name}' failed: {source}")]
    Middleware {
        name: String,
        #[source]
        source: BoxError,
    },

    /// The terminal handler returned an error.
    #[error("handler '{name}' failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: BoxError,
    },
}

/// Storage read failure behind the resource cache. Never cached.
#[derive(Debug, Error)]
#[error("failed to load resource '{path}': {source}")]
pub struct CacheLoadError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}

/// A job could not be run to completion by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Queue full and every allowed worker busy.
    #[error("worker pool saturated")]
    Saturated,

    #[error("worker pool is shut down")]
    ShutDown,

    #[error("job panicked: {0}")]
    Panicked(String),
}

/// Transport lifecycle failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("server is {0:?}; operation requires a different state")]
    InvalidState(crate::http::ServerState),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_status() {
        assert_eq!(
            ProtocolError::MethodNotAllowed("TRACE".into()).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ProtocolError::BodyTooLarge { limit: 10 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(ProtocolError::Malformed("x".into()).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn chain_error_keeps_source() {
        let err = ChainError::Middleware {
            name: "auth".into(),
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "middleware 'auth' failed: boom");
        assert!(std::error::Error::source(&err).is_some());
    }
}
