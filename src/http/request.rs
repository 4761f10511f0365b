//! Decoded request handed to middleware and handlers.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4) for tracing
//! - Strip the context path and split off the query string
//! - Parse query parameters into a multi-valued map
//! - Carry per-request attributes between middlewares
//!
//! # Design Decisions
//! - The body is fully buffered before the pipeline runs (handlers are sync)
//! - Parameters keep insertion order per key; repeated keys append

use bytes::Bytes;
use axum::http::header::HeaderValue;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri, Version};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::context::ServerContext;
use crate::routing::DispatchContext;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Multi-valued query parameters.
pub type Params = HashMap<String, Vec<String>>;

/// Generates `x-request-id` values for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestUuid;

impl MakeRequestId for RequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// A fully decoded HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    path: String,
    params: Params,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    dispatch: DispatchContext,
    attributes: HashMap<String, serde_json::Value>,
    context: Option<Arc<ServerContext>>,
}

impl Request {
    /// Build a request from a method and a raw request target (`/path?query`).
    pub fn new(method: Method, target: &str) -> Self {
        let uri: Uri = target.parse().unwrap_or_else(|_| Uri::from_static("/"));
        let (path, query) = split_target(target);
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            path: path.to_string(),
            params: query.map(parse_query).unwrap_or_default(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            dispatch: DispatchContext::Request,
            attributes: HashMap::new(),
            context: None,
        }
    }

    /// Build from decoded hyper parts, stripping `context_path` from the path.
    pub fn from_parts(parts: Parts, body: Bytes, context_path: &str, remote_addr: Option<SocketAddr>) -> Self {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let (path, query) = split_target(target);
        Self {
            method: parts.method,
            version: parts.version,
            path: strip_context_path(path, context_path).to_string(),
            params: query.map(parse_query).unwrap_or_default(),
            uri: parts.uri,
            headers: parts.headers,
            body,
            remote_addr,
            dispatch: DispatchContext::Request,
            attributes: HashMap::new(),
            context: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: axum::http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchContext) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_context(mut self, context: Arc<ServerContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Context-relative path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn dispatch(&self) -> DispatchContext {
        self.dispatch
    }

    /// Correlation ID set by the transport layer, if any.
    pub fn request_id(&self) -> &str {
        self.header(X_REQUEST_ID).unwrap_or("unknown")
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// First value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// All values of a query parameter.
    pub fn param_values(&self, name: &str) -> &[String] {
        self.params.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<serde_json::Value> {
        self.attributes.remove(name)
    }

    /// The application context serving this request.
    pub fn context(&self) -> Option<&Arc<ServerContext>> {
        self.context.as_ref()
    }
}

fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Remove a leading context path. `""` and `"/"` mean the root context.
pub fn strip_context_path<'a>(path: &'a str, context_path: &str) -> &'a str {
    if context_path.is_empty() || context_path == "/" {
        return path;
    }
    match path.strip_prefix(context_path) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Parse `a=1,2&b=3;c` into `{a: [1, 2], b: [3], c: [""]}`.
pub fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    for pair in query.split(['&', ';']).filter(|s| !s.is_empty()) {
        let (key, raw_values) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = decode_component(key);
        if key.is_empty() {
            continue;
        }
        let values = params.entry(key).or_default();
        values.extend(raw_values.split(',').map(decode_component));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsing() {
        let params = parse_query("a=1,2&b=3;c&&d=x%20y");
        assert_eq!(params["a"], vec!["1", "2"]);
        assert_eq!(params["b"], vec!["3"]);
        assert_eq!(params["c"], vec![""]);
        assert_eq!(params["d"], vec!["x y"]);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_repeated_keys_append() {
        let params = parse_query("tag=a&tag=b,c");
        assert_eq!(params["tag"], vec!["a", "b", "c"]);
    }

    #[test]
    fn test_request_splits_query() {
        let req = Request::new(Method::GET, "/search?q=rust&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.param("q"), Some("rust"));
        assert_eq!(req.param_values("page"), ["2".to_string()]);
        assert!(req.param_values("missing").is_empty());
    }

    #[test]
    fn test_context_path_stripping() {
        assert_eq!(strip_context_path("/app/index.html", "/app"), "/index.html");
        assert_eq!(strip_context_path("/app", "/app"), "");
        assert_eq!(strip_context_path("/application", "/app"), "/application");
        assert_eq!(strip_context_path("/x", ""), "/x");
        assert_eq!(strip_context_path("/x", "/"), "/x");
    }

    #[test]
    fn test_from_parts() {
        let (parts, _) = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/ctx/api/items?id=7")
            .header(X_REQUEST_ID, "abc")
            .body(())
            .unwrap()
            .into_parts();
        let req = Request::from_parts(parts, Bytes::from_static(b"payload"), "/ctx", None);
        assert_eq!(*req.method(), Method::POST);
        assert_eq!(req.path(), "/api/items");
        assert_eq!(req.param("id"), Some("7"));
        assert_eq!(req.request_id(), "abc");
        assert_eq!(req.body().as_ref(), b"payload");
    }

    #[test]
    fn test_attributes() {
        let mut req = Request::new(Method::GET, "/");
        req.set_attribute("user", serde_json::json!("alice"));
        assert_eq!(req.attribute("user"), Some(&serde_json::json!("alice")));
        assert!(req.remove_attribute("user").is_some());
        assert!(req.attribute("user").is_none());
    }
}
