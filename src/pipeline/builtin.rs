//! Middleware construction by kind, plus the built-in middleware.
//!
//! Configuration names a `kind` for every `[[middleware]]` entry; a factory
//! registered under that kind turns the entry's params into an instance once,
//! at setup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::StatusCode;

use super::{Chain, Middleware};
use crate::config::MiddlewareConfig;
use crate::error::{BoxError, ConfigurationError};
use crate::http::{Request, Response};

/// Builds a middleware from its configuration entry.
pub type MiddlewareFactory = Box<dyn Fn(&MiddlewareConfig) -> Result<Arc<dyn Middleware>, BoxError> + Send + Sync>;

/// Kind → factory table.
#[derive(Default)]
pub struct MiddlewareFactories {
    factories: HashMap<String, MiddlewareFactory>,
}

impl MiddlewareFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table preloaded with `access_log`, `response_header` and `reject`.
    pub fn with_builtins() -> Self {
        let mut factories = Self::new();
        factories.register("access_log", |_| Ok(Arc::new(AccessLog) as Arc<dyn Middleware>));
        factories.register("response_header", |config| {
            Ok(Arc::new(ResponseHeader::from_config(config)?) as Arc<dyn Middleware>)
        });
        factories.register("reject", |config| Ok(Arc::new(Reject::from_config(config)?) as Arc<dyn Middleware>));
        factories
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&MiddlewareConfig) -> Result<Arc<dyn Middleware>, BoxError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn build(&self, config: &MiddlewareConfig) -> Result<Arc<dyn Middleware>, ConfigurationError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| ConfigurationError::UnknownKind(config.kind.clone()))?;
        factory(config).map_err(|e| ConfigurationError::Factory {
            name: config.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Logs method, path, status and latency once the rest of the chain returns.
#[derive(Debug, Default)]
pub struct AccessLog;

impl Middleware for AccessLog {
    fn process(&self, request: &mut Request, response: &mut Response, chain: &mut Chain) -> Result<(), BoxError> {
        let start = Instant::now();
        let result = chain.advance(request, response);
        tracing::info!(
            request_id = %request.request_id(),
            method = %request.method(),
            path = %request.path(),
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            failed = result.is_err(),
            "Access"
        );
        Ok(result?)
    }
}

/// Sets one response header, then continues.
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl ResponseHeader {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    fn from_config(config: &MiddlewareConfig) -> Result<Self, BoxError> {
        let name = config.param_str("name").ok_or("missing param 'name'")?;
        let value = config.param_str("value").ok_or("missing param 'value'")?;
        Ok(Self {
            name: HeaderName::try_from(name)?,
            value: HeaderValue::try_from(value)?,
        })
    }
}

impl Middleware for ResponseHeader {
    fn process(&self, request: &mut Request, response: &mut Response, chain: &mut Chain) -> Result<(), BoxError> {
        response.insert_header(self.name.clone(), self.value.clone());
        Ok(chain.advance(request, response)?)
    }
}

/// Writes a fixed status and message without continuing the chain.
#[derive(Debug, Clone)]
pub struct Reject {
    status: StatusCode,
    message: String,
}

impl Reject {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn from_config(config: &MiddlewareConfig) -> Result<Self, BoxError> {
        let status = match config.param_str("status") {
            Some(raw) => StatusCode::from_bytes(raw.as_bytes())?,
            None => StatusCode::FORBIDDEN,
        };
        let message = config
            .param_str("message")
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Rejected").to_string());
        Ok(Self::new(status, message))
    }
}

impl Middleware for Reject {
    fn process(&self, request: &mut Request, response: &mut Response, _chain: &mut Chain) -> Result<(), BoxError> {
        tracing::debug!(path = %request.path(), status = self.status.as_u16(), "Request rejected by middleware");
        response.send_error(self.status, &self.message);
        Ok(())
    }
}
