//! Single-use cursor over a built middleware sequence.
//!
//! # Data Flow
//! ```text
//! invoke()
//!     → request_initialized listeners
//!     → advance(): middleware[0].process(req, resp, chain)
//!                      → chain.advance(): middleware[1] ...
//!                          → terminal.handle(req, resp)
//!     → request_destroyed listeners (every exit path, panics included)
//! ```

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::listeners::Listeners;
use super::{Handler, Middleware};
use crate::error::ChainError;
use crate::http::{Request, Response};

/// A middleware resolved by id, shared between the registry and every chain.
#[derive(Clone)]
pub struct Link {
    pub(crate) name: Arc<str>,
    pub(crate) middleware: Arc<dyn Middleware>,
}

impl Link {
    pub fn new(name: impl Into<Arc<str>>, middleware: Arc<dyn Middleware>) -> Self {
        Self {
            name: name.into(),
            middleware,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Per-request execution state. Never shared across requests.
pub struct Chain {
    links: Vec<Link>,
    cursor: usize,
    terminal: Arc<dyn Handler>,
    listeners: Arc<Listeners>,
}

impl Chain {
    pub(crate) fn new(links: Vec<Link>, terminal: Arc<dyn Handler>, listeners: Arc<Listeners>) -> Self {
        Self {
            links,
            cursor: 0,
            terminal,
            listeners,
        }
    }

    /// Chain with no middleware that goes straight to `terminal`.
    pub fn direct(terminal: Arc<dyn Handler>) -> Self {
        Self::new(Vec::new(), terminal, Arc::default())
    }

    /// Number of middleware entries, duplicates included.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Middleware ids in execution order.
    pub fn middleware_names(&self) -> Vec<&str> {
        self.links.iter().map(Link::name).collect()
    }

    pub fn terminal_name(&self) -> &str {
        self.terminal.name()
    }

    /// Run the next middleware, or the terminal once the sequence is exhausted.
    pub fn advance(&mut self, request: &mut Request, response: &mut Response) -> Result<(), ChainError> {
        if let Some(link) = self.links.get(self.cursor).cloned() {
            self.cursor += 1;
            tracing::trace!(middleware = %link.name, position = self.cursor, "Advancing chain");
            return link
                .middleware
                .process(request, response, self)
                .map_err(|err| match err.downcast::<ChainError>() {
                    // Raised by a nested advance; already carries its origin.
                    Ok(inner) => *inner,
                    Err(source) => ChainError::Middleware {
                        name: link.name.to_string(),
                        source,
                    },
                });
        }

        self.terminal
            .handle(request, response)
            .map_err(|source| ChainError::Handler {
                name: self.terminal.name().to_string(),
                source,
            })
    }

    /// Execute the whole chain, bracketed by the request lifecycle hooks.
    pub fn invoke(mut self, request: &mut Request, response: &mut Response) -> Result<(), ChainError> {
        let listeners = Arc::clone(&self.listeners);
        listeners.request_initialized(request);

        let outcome = catch_unwind(AssertUnwindSafe(|| self.advance(request, response)));

        listeners.request_destroyed(request);
        match outcome {
            Ok(result) => result,
            Err(panic) => resume_unwind(panic),
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("middlewares", &self.middleware_names())
            .field("cursor", &self.cursor)
            .field("terminal", &self.terminal.name())
            .finish()
    }
}
