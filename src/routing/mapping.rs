//! Mapping rules binding a middleware to url patterns or handler names.

use serde::{Deserialize, Serialize};

/// How a request reached the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchContext {
    Request,
    Forward,
    Include,
    Async,
    Error,
}

impl DispatchContext {
    fn bit(self) -> u8 {
        match self {
            DispatchContext::Request => 1,
            DispatchContext::Forward => 1 << 1,
            DispatchContext::Include => 1 << 2,
            DispatchContext::Async => 1 << 3,
            DispatchContext::Error => 1 << 4,
        }
    }
}

/// A set of dispatch contexts. An empty set behaves as `{REQUEST}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchContexts(u8);

impl DispatchContexts {
    /// The empty set (treated as `{REQUEST}` when matching).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a context to the set.
    pub fn with(mut self, ctx: DispatchContext) -> Self {
        self.0 |= ctx.bit();
        self
    }

    /// Membership test honouring the `{REQUEST}` default.
    pub fn contains(&self, ctx: DispatchContext) -> bool {
        if self.0 == 0 {
            return ctx == DispatchContext::Request;
        }
        self.0 & ctx.bit() != 0
    }
}

impl FromIterator<DispatchContext> for DispatchContexts {
    fn from_iter<I: IntoIterator<Item = DispatchContext>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// Immutable rule: apply `middleware_id` to requests matching either a url
/// pattern or a handler name, in the given dispatch contexts.
///
/// Exactly one of `url_pattern` / `handler_name` must be set; the registry
/// rejects anything else at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    middleware_id: String,
    handler_name: Option<String>,
    url_pattern: Option<String>,
    dispatch: DispatchContexts,
}

impl MappingRule {
    /// Build a rule from raw parts; validation happens when it is registered.
    pub fn new(
        middleware_id: impl Into<String>,
        url_pattern: Option<String>,
        handler_name: Option<String>,
    ) -> Self {
        Self {
            middleware_id: middleware_id.into(),
            handler_name,
            url_pattern: url_pattern.map(|p| decode_pattern(&p)),
            dispatch: DispatchContexts::empty(),
        }
    }

    /// Rule keyed on a url pattern.
    pub fn for_url(middleware_id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(middleware_id, Some(pattern.into()), None)
    }

    /// Rule keyed on a handler name (`*` matches every handler).
    pub fn for_handler(middleware_id: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::new(middleware_id, None, Some(handler.into()))
    }

    /// Restrict the rule to the given dispatch contexts.
    pub fn with_dispatch(mut self, contexts: impl IntoIterator<Item = DispatchContext>) -> Self {
        self.dispatch = contexts.into_iter().collect();
        self
    }

    pub fn middleware_id(&self) -> &str {
        &self.middleware_id
    }

    pub fn url_pattern(&self) -> Option<&str> {
        self.url_pattern.as_deref()
    }

    pub fn handler_name(&self) -> Option<&str> {
        self.handler_name.as_deref()
    }

    pub fn dispatch(&self) -> DispatchContexts {
        self.dispatch
    }

    /// True if the rule targets exactly one of url pattern / handler name.
    pub fn has_single_target(&self) -> bool {
        self.url_pattern.is_some() != self.handler_name.is_some()
    }
}

/// Percent-decode a configured pattern; undecodable input is kept verbatim.
fn decode_pattern(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            tracing::warn!(pattern = %raw, error = %e, "Url pattern is not valid percent-encoding; using it verbatim");
            raw.to_string()
        }
    }
}

impl std::fmt::Display for MappingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MappingRule[middleware={}", self.middleware_id)?;
        if let Some(name) = &self.handler_name {
            write!(f, ", handler={}", name)?;
        }
        if let Some(pattern) = &self.url_pattern {
            write!(f, ", url_pattern={}", pattern)?;
        }
        write!(f, "]")
    }
}
