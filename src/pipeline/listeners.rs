//! Typed lifecycle subscribers.
//!
//! Each event kind has its own subscriber list, so fan-out never needs a
//! type check. Every callback is isolated: an error or a panic is logged and
//! the remaining listeners still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::context::ServerContext;
use crate::error::BoxError;
use crate::http::Request;

/// Observes the start and end of every chain execution.
pub trait RequestListener: Send + Sync {
    fn request_initialized(&self, _request: &Request) -> Result<(), BoxError> {
        Ok(())
    }

    fn request_destroyed(&self, _request: &Request) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Observes server context startup and teardown.
pub trait ContextListener: Send + Sync {
    fn context_initialized(&self, _context: &ServerContext) -> Result<(), BoxError> {
        Ok(())
    }

    fn context_destroyed(&self, _context: &ServerContext) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Observes changes to server context attributes.
pub trait AttributeListener: Send + Sync {
    fn attribute_added(&self, _name: &str, _value: &serde_json::Value) -> Result<(), BoxError> {
        Ok(())
    }

    /// `old_value` is the value that was replaced.
    fn attribute_replaced(&self, _name: &str, _old_value: &serde_json::Value) -> Result<(), BoxError> {
        Ok(())
    }

    fn attribute_removed(&self, _name: &str, _value: &serde_json::Value) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Subscriber lists, one per event kind, in registration order.
#[derive(Clone, Default)]
pub struct Listeners {
    request: Vec<Arc<dyn RequestListener>>,
    context: Vec<Arc<dyn ContextListener>>,
    attribute: Vec<Arc<dyn AttributeListener>>,
}

impl Listeners {
    pub fn add_request(&mut self, listener: Arc<dyn RequestListener>) {
        self.request.push(listener);
    }

    pub fn add_context(&mut self, listener: Arc<dyn ContextListener>) {
        self.context.push(listener);
    }

    pub fn add_attribute(&mut self, listener: Arc<dyn AttributeListener>) {
        self.attribute.push(listener);
    }

    pub fn has_request_listeners(&self) -> bool {
        !self.request.is_empty()
    }

    pub fn request_initialized(&self, request: &Request) {
        for l in &self.request {
            notify("request_initialized", || l.request_initialized(request));
        }
    }

    pub fn request_destroyed(&self, request: &Request) {
        for l in &self.request {
            notify("request_destroyed", || l.request_destroyed(request));
        }
    }

    pub fn context_initialized(&self, context: &ServerContext) {
        for l in &self.context {
            notify("context_initialized", || l.context_initialized(context));
        }
    }

    pub fn context_destroyed(&self, context: &ServerContext) {
        for l in &self.context {
            notify("context_destroyed", || l.context_destroyed(context));
        }
    }

    pub fn attribute_added(&self, name: &str, value: &serde_json::Value) {
        for l in &self.attribute {
            notify("attribute_added", || l.attribute_added(name, value));
        }
    }

    pub fn attribute_replaced(&self, name: &str, old_value: &serde_json::Value) {
        for l in &self.attribute {
            notify("attribute_replaced", || l.attribute_replaced(name, old_value));
        }
    }

    pub fn attribute_removed(&self, name: &str, value: &serde_json::Value) {
        for l in &self.attribute {
            notify("attribute_removed", || l.attribute_removed(name, value));
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("request", &self.request.len())
            .field("context", &self.context.len())
            .field("attribute", &self.attribute.len())
            .finish()
    }
}

fn notify<F>(event: &'static str, callback: F)
where
    F: FnOnce() -> Result<(), BoxError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(event, error = %e, "Listener failed"),
        Err(_) => tracing::error!(event, "Listener panicked"),
    }
}
