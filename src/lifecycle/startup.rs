//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve `[[middleware]]` definitions through the factories
//! - Build the pipeline registry and deploy it inside a `ServerContext`
//! - Create the `HttpServer` for that context
//!
//! # Design Decisions
//! - Fail fast: any setup error is fatal and nothing is bound
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ConfigurationError;
use crate::http::HttpServer;
use crate::pipeline::{Handler, MiddlewareFactories, PipelineRegistry};

/// Build a stopped server from validated configuration.
pub fn build_server(
    config: ServerConfig,
    factories: &MiddlewareFactories,
    app: Arc<dyn Handler>,
) -> Result<HttpServer, ConfigurationError> {
    let registry = PipelineRegistry::from_config(&config.middleware, &config.mapping, factories)?;
    let context = ServerContext::new(
        config.context.name.clone(),
        config.context.context_path.clone(),
        registry,
    )?;
    tracing::info!(
        context = %context.name(),
        context_path = %context.context_path(),
        app = %app.name(),
        "Context deployed"
    );
    Ok(HttpServer::new(config, context, app))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MappingConfig, MiddlewareConfig};
    use crate::http::NotFoundHandler;

    fn middleware(name: &str, kind: &str) -> MiddlewareConfig {
        MiddlewareConfig {
            name: name.to_string(),
            kind: kind.to_string(),
            params: Default::default(),
        }
    }

    #[test]
    fn test_builds_deployed_context() {
        let mut config = ServerConfig::default();
        config.context.context_path = "/shop".to_string();
        config.middleware.push(middleware("log", "access_log"));
        config.mapping.push(MappingConfig {
            middleware: "log".to_string(),
            url_pattern: Some("/*".to_string()),
            handler_name: None,
            dispatch: Vec::new(),
            match_after: true,
        });

        let server = build_server(config, &MiddlewareFactories::with_builtins(), Arc::new(NotFoundHandler)).unwrap();
        let context = server.context();
        assert_eq!(context.context_path(), "/shop");
        assert!(context.pipeline().is_deployed());
        assert_eq!(context.pipeline().url_patterns_for("log"), vec!["/*"]);
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let mut config = ServerConfig::default();
        config.middleware.push(middleware("x", "does_not_exist"));
        let err = build_server(config, &MiddlewareFactories::with_builtins(), Arc::new(NotFoundHandler)).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownKind("does_not_exist".to_string()));
    }
}
