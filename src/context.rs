//! Explicit application context shared by the server and every request.
//!
//! # Responsibilities
//! - Own the deployed (read-only) pipeline registry
//! - Hold context-scoped attributes and notify attribute listeners
//! - Fire context listeners on server start and stop
//!
//! # Design Decisions
//! - Created once per server and passed around as `Arc<ServerContext>`
//! - Attributes live in a `DashMap`; listeners run after the map lock is released

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::pipeline::{Chain, Handler, Listeners, PipelineRegistry};
use crate::routing::DispatchContext;

pub struct ServerContext {
    name: String,
    context_path: String,
    pipeline: PipelineRegistry,
    attributes: DashMap<String, serde_json::Value>,
}

impl ServerContext {
    /// Validate the context path and deploy `pipeline`. The registry is frozen from here on.
    pub fn new(
        name: impl Into<String>,
        context_path: impl Into<String>,
        mut pipeline: PipelineRegistry,
    ) -> Result<Arc<Self>, ConfigurationError> {
        let context_path = context_path.into();
        validate_context_path(&context_path)?;
        pipeline.deploy();
        Ok(Arc::new(Self {
            name: name.into(),
            context_path,
            pipeline,
            attributes: DashMap::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn pipeline(&self) -> &PipelineRegistry {
        &self.pipeline
    }

    pub fn listeners(&self) -> &Listeners {
        self.pipeline.listeners()
    }

    pub fn build_chain(&self, path: Option<&str>, dispatch: DispatchContext, terminal: Arc<dyn Handler>) -> Chain {
        self.pipeline.build_chain(path, dispatch, terminal)
    }

    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes.get(name).map(|v| v.value().clone())
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.iter().map(|e| e.key().clone()).collect()
    }

    /// Store an attribute. `Null` removes it.
    pub fn set_attribute(&self, name: impl Into<String>, value: serde_json::Value) {
        let name = name.into();
        if value.is_null() {
            self.remove_attribute(&name);
            return;
        }
        match self.attributes.insert(name.clone(), value.clone()) {
            Some(old) => self.listeners().attribute_replaced(&name, &old),
            None => self.listeners().attribute_added(&name, &value),
        }
    }

    pub fn remove_attribute(&self, name: &str) -> Option<serde_json::Value> {
        let (key, value) = self.attributes.remove(name)?;
        self.listeners().attribute_removed(&key, &value);
        Some(value)
    }

    pub fn initialize(&self) {
        tracing::info!(context = %self.name, path = %self.context_path, "Context initialized");
        self.listeners().context_initialized(self);
    }

    pub fn destroy(&self) {
        self.listeners().context_destroyed(self);
        tracing::info!(context = %self.name, "Context destroyed");
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("name", &self.name)
            .field("context_path", &self.context_path)
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

/// Empty, or starts with `/` and has no trailing `/` unless it is exactly `/`.
pub fn validate_context_path(path: &str) -> Result<(), ConfigurationError> {
    if path.is_empty() || path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') {
        return Err(ConfigurationError::InvalidContext(format!(
            "context path '{path}' must start with '/'"
        )));
    }
    if path.ends_with('/') {
        return Err(ConfigurationError::InvalidContext(format!(
            "context path '{path}' must not end with '/'"
        )));
    }
    Ok(())
}
