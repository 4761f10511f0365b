//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (mappings reference defined middleware)
//! - Validate value ranges (pool sizes, queue depth, cache ceilings)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::context::validate_context_path;
use crate::routing::matcher::validate_url_pattern;

/// One failed semantic check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::new("listener.backlog", "must be greater than 0"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if let Some(tls) = &config.listener.tls {
        if !Path::new(&tls.cert_path).is_file() {
            errors.push(ValidationError::new(
                "listener.tls.cert_path",
                format!("'{}' is not a readable file", tls.cert_path),
            ));
        }
        if !Path::new(&tls.key_path).is_file() {
            errors.push(ValidationError::new(
                "listener.tls.key_path",
                format!("'{}' is not a readable file", tls.key_path),
            ));
        }
    }

    let executor = &config.executor;
    if executor.core_pool_size == 0 {
        errors.push(ValidationError::new("executor.core_pool_size", "must be greater than 0"));
    }
    if executor.max_pool_size < executor.core_pool_size {
        errors.push(ValidationError::new(
            "executor.max_pool_size",
            format!(
                "{} is smaller than core_pool_size {}",
                executor.max_pool_size, executor.core_pool_size
            ),
        ));
    }
    if executor.queue_depth == 0 {
        errors.push(ValidationError::new("executor.queue_depth", "must be greater than 0"));
    }

    if config.timeouts.header_read_secs == 0 {
        errors.push(ValidationError::new("timeouts.header_read_secs", "must be greater than 0"));
    }

    if let Err(e) = validate_context_path(&config.context.context_path) {
        errors.push(ValidationError::new("context.context_path", e.to_string()));
    }

    if config.http.allowed_methods.is_empty() {
        errors.push(ValidationError::new("http.allowed_methods", "must list at least one method"));
    }
    for method in &config.http.allowed_methods {
        if axum::http::Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "http.allowed_methods",
                format!("'{method}' is not a valid HTTP method"),
            ));
        }
    }

    if config.static_files.enabled && !config.static_files.index.starts_with('/') {
        errors.push(ValidationError::new("static_files.index", "must start with '/'"));
    }

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be greater than 0"));
    }
    if config.cache.max_bytes == 0 {
        errors.push(ValidationError::new("cache.max_bytes", "must be greater than 0"));
    }
    if config.cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    let mut names = HashSet::new();
    for (i, middleware) in config.middleware.iter().enumerate() {
        if middleware.name.is_empty() {
            errors.push(ValidationError::new(format!("middleware[{i}].name"), "must not be empty"));
        } else if !names.insert(middleware.name.as_str()) {
            errors.push(ValidationError::new(
                format!("middleware[{i}].name"),
                format!("'{}' is defined more than once", middleware.name),
            ));
        }
    }

    for (i, mapping) in config.mapping.iter().enumerate() {
        let field = format!("mapping[{i}]");
        if !names.contains(mapping.middleware.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.middleware"),
                format!("references undefined middleware '{}'", mapping.middleware),
            ));
        }
        match (&mapping.url_pattern, &mapping.handler_name) {
            (Some(_), Some(_)) | (None, None) => errors.push(ValidationError::new(
                field,
                "must specify exactly one of url_pattern or handler_name",
            )),
            (Some(pattern), None) => {
                let decoded = urlencoding::decode(pattern).map(|p| p.into_owned()).unwrap_or_else(|_| pattern.clone());
                if !validate_url_pattern(&decoded) {
                    errors.push(ValidationError::new(
                        format!("{field}.url_pattern"),
                        format!("'{pattern}' is not a valid url pattern"),
                    ));
                }
            }
            (None, Some(_)) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
