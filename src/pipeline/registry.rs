//! Named middleware plus the ordered mapping rules that select them.
//!
//! # Responsibilities
//! - Register middleware by id and validate mapping rules
//! - Freeze on `deploy()`: every later mutation is a `ConfigurationError`
//! - Build a per-request `Chain` with two passes (url rules, then handler rules)
//!
//! # Design Decisions
//! - Rule order is insertion order; `match_after = false` prepends
//! - A middleware matched by both passes appears twice in the chain
//! - Chains copy `Link`s out of the registry, so nothing grows in place

use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::MiddlewareFactories;
use super::chain::{Chain, Link};
use super::listeners::{AttributeListener, ContextListener, Listeners, RequestListener};
use super::{Handler, Middleware};
use crate::config::{MappingConfig, MiddlewareConfig};
use crate::error::ConfigurationError;
use crate::routing::matcher;
use crate::routing::{DispatchContext, MappingRule};

#[derive(Default)]
pub struct PipelineRegistry {
    middlewares: HashMap<String, Link>,
    rules: Vec<MappingRule>,
    listeners: Arc<Listeners>,
    deployed: bool,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `[[middleware]]` definitions through `factories`, then add every `[[mapping]]`.
    pub fn from_config(
        middlewares: &[MiddlewareConfig],
        mappings: &[MappingConfig],
        factories: &MiddlewareFactories,
    ) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for config in middlewares {
            let middleware = factories.build(config)?;
            registry.register(config.name.clone(), middleware)?;
        }
        for mapping in mappings {
            registry.add_mapping(mapping.to_rule(), mapping.match_after)?;
        }
        tracing::info!(
            middlewares = registry.middlewares.len(),
            rules = registry.rules.len(),
            "Pipeline built from configuration"
        );
        Ok(registry)
    }

    /// Bind `id` to `middleware`.
    ///
    /// Before deploy a second registration overwrites the first. After deploy,
    /// re-registering the identical instance is accepted; anything else fails.
    pub fn register(&mut self, id: impl Into<String>, middleware: Arc<dyn Middleware>) -> Result<(), ConfigurationError> {
        let id = id.into();
        if self.deployed {
            return match self.middlewares.get(&id) {
                Some(existing) if Arc::ptr_eq(&existing.middleware, &middleware) => Ok(()),
                Some(_) => Err(ConfigurationError::ConflictingMiddleware(id)),
                None => Err(ConfigurationError::AlreadyDeployed("register middleware")),
            };
        }

        if self.middlewares.contains_key(&id) {
            tracing::debug!(middleware = %id, "Overwriting middleware registration");
        }
        let link = Link::new(id.as_str(), middleware);
        self.middlewares.insert(id, link);
        Ok(())
    }

    /// Validate `rule` and insert it at the back (`match_after`) or the front.
    pub fn add_mapping(&mut self, rule: MappingRule, match_after: bool) -> Result<(), ConfigurationError> {
        if self.deployed {
            return Err(ConfigurationError::AlreadyDeployed("add mapping"));
        }
        if !rule.has_single_target() {
            return Err(ConfigurationError::AmbiguousTarget(rule.middleware_id().to_string()));
        }
        if !self.middlewares.contains_key(rule.middleware_id()) {
            return Err(ConfigurationError::UnknownMiddleware(rule.middleware_id().to_string()));
        }
        if let Some(pattern) = rule.url_pattern() {
            if !matcher::validate_url_pattern(pattern) {
                return Err(ConfigurationError::InvalidPattern {
                    middleware: rule.middleware_id().to_string(),
                    pattern: pattern.to_string(),
                });
            }
        }

        tracing::debug!(rule = %rule, match_after, "Adding mapping");
        if match_after {
            self.rules.push(rule);
        } else {
            self.rules.insert(0, rule);
        }
        Ok(())
    }

    pub fn add_request_listener(&mut self, listener: Arc<dyn RequestListener>) -> Result<(), ConfigurationError> {
        self.listeners_mut("add request listener")?.add_request(listener);
        Ok(())
    }

    pub fn add_context_listener(&mut self, listener: Arc<dyn ContextListener>) -> Result<(), ConfigurationError> {
        self.listeners_mut("add context listener")?.add_context(listener);
        Ok(())
    }

    pub fn add_attribute_listener(&mut self, listener: Arc<dyn AttributeListener>) -> Result<(), ConfigurationError> {
        self.listeners_mut("add attribute listener")?.add_attribute(listener);
        Ok(())
    }

    fn listeners_mut(&mut self, action: &'static str) -> Result<&mut Listeners, ConfigurationError> {
        if self.deployed {
            return Err(ConfigurationError::AlreadyDeployed(action));
        }
        Ok(Arc::make_mut(&mut self.listeners))
    }

    /// Freeze the registry. Idempotent.
    pub fn deploy(&mut self) {
        if !self.deployed {
            self.deployed = true;
            tracing::info!(
                middlewares = self.middlewares.len(),
                rules = self.rules.len(),
                "Pipeline deployed"
            );
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed
    }

    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.listeners
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    pub fn middleware(&self, id: &str) -> Option<&Arc<dyn Middleware>> {
        self.middlewares.get(id).map(|link| &link.middleware)
    }

    /// Url patterns mapped to `id`, in rule order.
    pub fn url_patterns_for(&self, id: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.middleware_id() == id)
            .filter_map(MappingRule::url_pattern)
            .collect()
    }

    /// Handler names mapped to `id`, in rule order.
    pub fn handler_names_for(&self, id: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.middleware_id() == id)
            .filter_map(MappingRule::handler_name)
            .collect()
    }

    /// Build the chain for one request.
    ///
    /// Url-pattern rules matching `path` come first, then handler-name rules
    /// matching the terminal's name, each pass in rule order.
    pub fn build_chain(&self, path: Option<&str>, dispatch: DispatchContext, terminal: Arc<dyn Handler>) -> Chain {
        let handler_name = terminal.name();
        let mut links = Vec::new();
        for rule in &self.rules {
            if rule.url_pattern().is_some() && rule.dispatch().contains(dispatch) && matcher::matches(rule, path, None) {
                self.push_link(&mut links, rule);
            }
        }
        for rule in &self.rules {
            if rule.handler_name().is_some()
                && rule.dispatch().contains(dispatch)
                && matcher::matches(rule, None, Some(handler_name))
            {
                self.push_link(&mut links, rule);
            }
        }

        Chain::new(links, terminal, Arc::clone(&self.listeners))
    }

    fn push_link(&self, links: &mut Vec<Link>, rule: &MappingRule) {
        match self.middlewares.get(rule.middleware_id()) {
            Some(link) => links.push(link.clone()),
            None => tracing::warn!(middleware = %rule.middleware_id(), "Mapped middleware is not registered"),
        }
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.middlewares.keys().collect();
        ids.sort();
        f.debug_struct("PipelineRegistry")
            .field("middlewares", &ids)
            .field("rules", &self.rules)
            .field("listeners", &self.listeners)
            .field("deployed", &self.deployed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use crate::pipeline::{handler_fn, middleware_fn};
    use axum::http::Method;
    use std::sync::Mutex;

    fn passthrough() -> Arc<dyn Middleware> {
        middleware_fn(|req, resp, chain| Ok(chain.advance(req, resp)?))
    }

    fn terminal(name: &str) -> Arc<dyn Handler> {
        handler_fn(name, |_req, _resp| Ok(()))
    }

    fn registry_with(ids: &[&str]) -> PipelineRegistry {
        let mut registry = PipelineRegistry::new();
        for id in ids {
            registry.register(*id, passthrough()).unwrap();
        }
        registry
    }

    #[test]
    fn test_empty_registry_builds_empty_chain() {
        let registry = PipelineRegistry::new();
        let chain = registry.build_chain(Some("/x"), DispatchContext::Request, terminal("app"));
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_url_pass_precedes_handler_pass() {
        let mut registry = registry_with(&["by_name", "by_url", "logging"]);
        registry.add_mapping(MappingRule::for_handler("by_name", "app"), true).unwrap();
        registry.add_mapping(MappingRule::for_url("by_url", "/api/*"), true).unwrap();
        registry.add_mapping(MappingRule::for_url("logging", "/*"), true).unwrap();

        let chain = registry.build_chain(Some("/api/items"), DispatchContext::Request, terminal("app"));
        assert_eq!(chain.middleware_names(), vec!["by_url", "logging", "by_name"]);
    }

    #[test]
    fn test_double_match_appears_twice() {
        let mut registry = registry_with(&["audit"]);
        registry.add_mapping(MappingRule::for_url("audit", "/*"), true).unwrap();
        registry.add_mapping(MappingRule::for_handler("audit", "*"), true).unwrap();

        let counter = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&counter);
        registry
            .register(
                "audit",
                middleware_fn(move |req, resp, chain| {
                    *seen.lock().unwrap() += 1;
                    Ok(chain.advance(req, resp)?)
                }),
            )
            .unwrap();

        let chain = registry.build_chain(Some("/page"), DispatchContext::Request, terminal("app"));
        assert_eq!(chain.middleware_names(), vec!["audit", "audit"]);
        chain
            .invoke(&mut Request::new(Method::GET, "/page"), &mut Response::new())
            .unwrap();
        assert_eq!(*counter.lock().unwrap(), 2);
    }

    #[test]
    fn test_match_before_prepends() {
        let mut registry = registry_with(&["first", "second"]);
        registry.add_mapping(MappingRule::for_url("second", "/*"), true).unwrap();
        registry.add_mapping(MappingRule::for_url("first", "/*"), false).unwrap();

        let chain = registry.build_chain(Some("/"), DispatchContext::Request, terminal("app"));
        assert_eq!(chain.middleware_names(), vec!["first", "second"]);
    }

    #[test]
    fn test_dispatch_scope() {
        let mut registry = registry_with(&["req_only", "errors"]);
        registry.add_mapping(MappingRule::for_url("req_only", "/*"), true).unwrap();
        registry
            .add_mapping(
                MappingRule::for_url("errors", "/*").with_dispatch([DispatchContext::Error]),
                true,
            )
            .unwrap();

        let request = registry.build_chain(Some("/x"), DispatchContext::Request, terminal("app"));
        assert_eq!(request.middleware_names(), vec!["req_only"]);
        let error = registry.build_chain(Some("/x"), DispatchContext::Error, terminal("app"));
        assert_eq!(error.middleware_names(), vec!["errors"]);
    }

    #[test]
    fn test_absent_path_matches_only_handler_rules() {
        let mut registry = registry_with(&["url", "name"]);
        registry.add_mapping(MappingRule::for_url("url", "/*"), true).unwrap();
        registry.add_mapping(MappingRule::for_handler("name", "app"), true).unwrap();

        let chain = registry.build_chain(None, DispatchContext::Request, terminal("app"));
        assert_eq!(chain.middleware_names(), vec!["name"]);
    }

    #[test]
    fn test_mapping_validation() {
        let mut registry = registry_with(&["auth"]);
        assert_eq!(
            registry.add_mapping(MappingRule::for_url("ghost", "/*"), true),
            Err(ConfigurationError::UnknownMiddleware("ghost".into()))
        );
        assert_eq!(
            registry.add_mapping(MappingRule::new("auth", Some("/a".into()), Some("app".into())), true),
            Err(ConfigurationError::AmbiguousTarget("auth".into()))
        );
        assert_eq!(
            registry.add_mapping(MappingRule::new("auth", None, None), true),
            Err(ConfigurationError::AmbiguousTarget("auth".into()))
        );
        assert!(matches!(
            registry.add_mapping(MappingRule::for_url("auth", "/a/*.jsp"), true),
            Err(ConfigurationError::InvalidPattern { .. })
        ));
        assert!(registry.rules().is_empty());
    }

    #[test]
    fn test_mutation_after_deploy_is_rejected() {
        let shared = passthrough();
        let mut registry = PipelineRegistry::new();
        registry.register("auth", Arc::clone(&shared)).unwrap();
        registry.deploy();

        assert_eq!(
            registry.add_mapping(MappingRule::for_url("auth", "/*"), true),
            Err(ConfigurationError::AlreadyDeployed("add mapping"))
        );
        assert_eq!(
            registry.register("auth", passthrough()),
            Err(ConfigurationError::ConflictingMiddleware("auth".into()))
        );
        assert!(registry.register("auth", shared).is_ok());
        assert!(matches!(
            registry.register("fresh", passthrough()),
            Err(ConfigurationError::AlreadyDeployed(_))
        ));
        assert!(registry.add_request_listener(Arc::new(NoopListener)).is_err());
    }

    struct NoopListener;
    impl RequestListener for NoopListener {}

    #[test]
    fn test_reregistration_before_deploy_overwrites() {
        let mut registry = registry_with(&["auth"]);
        let replacement = passthrough();
        registry.register("auth", Arc::clone(&replacement)).unwrap();
        assert!(Arc::ptr_eq(registry.middleware("auth").unwrap(), &replacement));
    }

    #[test]
    fn test_patterns_and_names_for() {
        let mut registry = registry_with(&["auth"]);
        registry.add_mapping(MappingRule::for_url("auth", "/secure/*"), true).unwrap();
        registry.add_mapping(MappingRule::for_handler("auth", "admin"), true).unwrap();
        registry.add_mapping(MappingRule::for_url("auth", "*.do"), true).unwrap();

        assert_eq!(registry.url_patterns_for("auth"), vec!["/secure/*", "*.do"]);
        assert_eq!(registry.handler_names_for("auth"), vec!["admin"]);
        assert!(registry.url_patterns_for("other").is_empty());
    }
}
