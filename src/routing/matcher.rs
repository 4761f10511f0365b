//! Mapping-rule matching logic.
//!
//! # Responsibilities
//! - Match request paths against url patterns (exact, `prefix/*`, `*.ext`)
//! - Match handler names (exact or the `*` wildcard)
//! - Validate url patterns at registration time
//!
//! # Design Decisions
//! - Pure and total: invalid input never panics, it just does not match
//! - Case-sensitive, byte-wise comparison
//! - No regex; every check is a prefix/suffix scan

use crate::routing::mapping::MappingRule;

/// Handler-name token that matches every handler.
pub const ANY_HANDLER: &str = "*";

/// Returns true if `rule` applies to the given request path or handler name.
///
/// A url-pattern rule only looks at `path`; a handler-name rule only looks at
/// `handler_name`.
pub fn matches(rule: &MappingRule, path: Option<&str>, handler_name: Option<&str>) -> bool {
    match (rule.url_pattern(), rule.handler_name()) {
        (Some(pattern), None) => matches_url(Some(pattern), path),
        (None, Some(name)) => matches_handler(Some(name), handler_name),
        _ => false,
    }
}

/// Url-pattern matching. First rule that applies wins:
/// exact, then path-prefix wildcard, then extension wildcard.
pub fn matches_url(pattern: Option<&str>, path: Option<&str>) -> bool {
    let (Some(pattern), Some(path)) = (pattern, path) else {
        return false;
    };

    if pattern == path {
        return true;
    }

    if pattern == "/*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        };
    }

    if let Some(ext) = pattern.strip_prefix("*.") {
        let Some(slash) = path.rfind('/') else {
            return false;
        };
        let Some(period) = path.rfind('.') else {
            return false;
        };
        // A bare ".ext" segment has no file stem and is not an extension match.
        if period <= slash + 1 || period == path.len() - 1 {
            return false;
        }
        return &path[period + 1..] == ext;
    }

    false
}

/// Handler-name matching: exact equality or the `*` wildcard.
pub fn matches_handler(rule_name: Option<&str>, handler_name: Option<&str>) -> bool {
    match (rule_name, handler_name) {
        (Some(rule), Some(handler)) => rule == handler || rule == ANY_HANDLER,
        _ => false,
    }
}

/// Checks that a url pattern can ever match.
///
/// Valid forms: empty, `*.ext` (no `/`), or anything starting with `/` that
/// does not contain `*.`. Unusual trailing wildcards are accepted but logged.
pub fn validate_url_pattern(pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    if pattern.contains('\n') || pattern.contains('\r') {
        tracing::warn!(pattern = %pattern.escape_debug(), "Url pattern contains CR or LF and can never match");
        return false;
    }
    if pattern.starts_with("*.") {
        if pattern.contains('/') {
            return false;
        }
        check_unusual_pattern(pattern);
        return true;
    }
    if pattern.starts_with('/') && !pattern.contains("*.") {
        check_unusual_pattern(pattern);
        return true;
    }
    false
}

fn check_unusual_pattern(pattern: &str) {
    if pattern.ends_with('*') && !pattern.ends_with("/*") {
        tracing::info!(pattern = %pattern, "Suspicious url pattern: trailing '*' is not preceded by '/'");
    }
}
