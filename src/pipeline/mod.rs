//! Middleware pipeline: registration, chain construction and execution.
//!
//! # Responsibilities
//! - Hold named middleware and the ordered mapping rules (`registry`)
//! - Build a fresh `Chain` per request from the deployed registry
//! - Run middleware in order with continuation passing (`chain`)
//! - Fan lifecycle events out to typed listeners (`listeners`)
//! - Construct middleware from configuration by kind (`builtin`)
//!
//! # Design Decisions
//! - Middleware and handlers are synchronous; they run on worker threads
//! - The registry is mutable only until `deploy()`, then read-only
//! - A middleware short-circuits by returning without calling `advance`

pub mod builtin;
pub mod chain;
pub mod listeners;
pub mod registry;

pub use builtin::MiddlewareFactories;
pub use chain::{Chain, Link};
pub use listeners::{AttributeListener, ContextListener, Listeners, RequestListener};
pub use registry::PipelineRegistry;

use std::sync::Arc;

use crate::error::BoxError;
use crate::http::{Request, Response};

/// Interceptor that runs before the terminal handler.
pub trait Middleware: Send + Sync {
    /// Call `chain.advance(request, response)` to continue, or return to short-circuit.
    fn process(&self, request: &mut Request, response: &mut Response, chain: &mut Chain) -> Result<(), BoxError>;
}

/// Terminal step of a chain; the seam to the application.
pub trait Handler: Send + Sync {
    /// Name matched by handler-name mapping rules.
    fn name(&self) -> &str;

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), BoxError>;
}

struct FnMiddleware<F>(F);

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request, &mut Response, &mut Chain) -> Result<(), BoxError> + Send + Sync,
{
    fn process(&self, request: &mut Request, response: &mut Response, chain: &mut Chain) -> Result<(), BoxError> {
        (self.0)(request, response, chain)
    }
}

/// Wrap a closure as a middleware.
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut Request, &mut Response, &mut Chain) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), BoxError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), BoxError> {
        (self.f)(request, response)
    }
}

/// Wrap a closure as a named terminal handler.
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn Handler>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(FnHandler { name: name.into(), f })
}
