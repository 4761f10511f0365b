//! Per-request dispatch from the connection task into the pipeline.
//!
//! # Data Flow
//! ```text
//! axum fallback handler
//!     → method gate (405 + Allow)
//!     → body buffered under max_body_bytes (413 / 400)
//!     → Request (context path stripped, query parsed)
//!     → terminal: static handler or application handler
//!     → chain built from the deployed registry
//!     → WorkerPool::submit(chain.invoke) (503 when saturated),
//!       run inside the caller's request span
//!     → Response → wire
//! ```

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{HeaderValue, ALLOW, RETRY_AFTER};
use axum::http::{Method, StatusCode};
use axum::response::Response as HttpResponse;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::StaticResources;
use crate::config::{HttpConfig, StaticFilesConfig};
use crate::context::ServerContext;
use crate::error::{BoxError, PoolError, ProtocolError};
use crate::http::request::Request;
use crate::http::response::{plain, Response};
use crate::observability::metrics;
use crate::pipeline::Handler;
use crate::routing::DispatchContext;
use crate::worker::WorkerPool;

/// Name of the built-in terminal that serves cached static resources.
pub const STATIC_HANDLER: &str = "static";

/// Serves static resources through the cache.
pub struct StaticHandler {
    resources: StaticResources,
    index: String,
}

impl StaticHandler {
    pub fn new(resources: StaticResources, index: impl Into<String>) -> Self {
        Self {
            resources,
            index: index.into(),
        }
    }

    pub fn resources(&self) -> &StaticResources {
        &self.resources
    }

    /// Cache key for a context-relative path; the root maps to the index.
    pub fn resolve<'a>(&'a self, path: &'a str) -> &'a str {
        if path.is_empty() || path == "/" {
            &self.index
        } else {
            path
        }
    }
}

impl Handler for StaticHandler {
    fn name(&self) -> &str {
        STATIC_HANDLER
    }

    fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), BoxError> {
        let key = self.resolve(request.path());
        let payload = match self.resources.fetch(key) {
            Ok(payload) => payload,
            // Served as a miss; the next request retries the load.
            Err(e) => {
                tracing::warn!(key, error = %e, "Static resource unavailable");
                None
            }
        };

        match payload.filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => {
                let mime = mime_guess::from_path(key).first_or_octet_stream();
                match HeaderValue::from_str(mime.as_ref()) {
                    Ok(value) => response.insert_header(axum::http::header::CONTENT_TYPE, value),
                    Err(_) => response.set_content_type("application/octet-stream"),
                }
                response.set_status(StatusCode::OK);
                response.set_body(&bytes);
            }
            None => response.send_error(StatusCode::NOT_FOUND, "Not Found"),
        }
        Ok(())
    }
}

/// Fallback application handler: every dynamic path is unknown.
#[derive(Debug, Default)]
pub struct NotFoundHandler;

impl Handler for NotFoundHandler {
    fn name(&self) -> &str {
        "default"
    }

    fn handle(&self, _request: &mut Request, response: &mut Response) -> Result<(), BoxError> {
        response.send_error(StatusCode::NOT_FOUND, "Not Found");
        Ok(())
    }
}

/// Shared state of the axum fallback handler.
pub struct Dispatcher {
    context: Arc<ServerContext>,
    pool: Arc<WorkerPool>,
    app: Arc<dyn Handler>,
    static_handler: Option<Arc<StaticHandler>>,
    static_files: StaticFilesConfig,
    allowed: Vec<Method>,
    allow_header: HeaderValue,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(
        context: Arc<ServerContext>,
        pool: Arc<WorkerPool>,
        app: Arc<dyn Handler>,
        static_handler: Option<Arc<StaticHandler>>,
        static_files: &StaticFilesConfig,
        http: &HttpConfig,
    ) -> Self {
        let allowed: Vec<Method> = http
            .allowed_methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .collect();
        let allow_list = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        let allow_header = HeaderValue::from_str(&allow_list).unwrap_or_else(|_| HeaderValue::from_static("GET"));

        Self {
            context,
            pool,
            app,
            static_handler,
            static_files: static_files.clone(),
            allowed,
            allow_header,
            max_body_bytes: http.max_body_bytes,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// True when `path` names a static resource.
    pub fn is_static(&self, path: &str) -> bool {
        if self.static_handler.is_none() || !self.static_files.enabled {
            return false;
        }
        if path.is_empty() || path == "/" {
            return true;
        }
        let last = path.rsplit('/').next().unwrap_or(path);
        match last.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self.static_files.is_static_extension(ext),
            _ => false,
        }
    }

    /// Run one request through the pipeline.
    pub async fn dispatch(&self, request: axum::extract::Request) -> HttpResponse {
        let start = Instant::now();
        let method = request.method().clone();
        let response = self.dispatch_inner(request).await;
        metrics::record_request(method.as_str(), response.status().as_u16(), start);
        response
    }

    async fn dispatch_inner(&self, request: axum::extract::Request) -> HttpResponse {
        if !self.allowed.contains(request.method()) {
            let err = ProtocolError::MethodNotAllowed(request.method().to_string());
            tracing::debug!(error = %err, "Rejecting request");
            let mut response = plain(err.status(), "Method Not Allowed");
            response.headers_mut().insert(ALLOW, self.allow_header.clone());
            return response;
        }

        let remote = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let (parts, body) = request.into_parts();
        let body = match read_body(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(error = %err, "Rejecting request body");
                return plain(err.status(), &err.to_string());
            }
        };

        let request = Request::from_parts(parts, body, self.context.context_path(), remote)
            .with_dispatch(DispatchContext::Request)
            .with_context(Arc::clone(&self.context));

        let serves_static = matches!(*request.method(), Method::GET | Method::HEAD) && self.is_static(request.path());
        let terminal: Arc<dyn Handler> = match (&self.static_handler, serves_static) {
            (Some(handler), true) => Arc::clone(handler) as Arc<dyn Handler>,
            _ => Arc::clone(&self.app),
        };

        let chain = self
            .context
            .build_chain(Some(request.path()), request.dispatch(), terminal);
        tracing::debug!(
            path = %request.path(),
            middlewares = chain.len(),
            terminal = %chain.terminal_name(),
            "Chain built"
        );

        // The worker thread re-enters the request span so chain logs carry its id.
        let span = tracing::Span::current();
        let job = move || {
            span.in_scope(|| {
                let mut request = request;
                let mut response = Response::new();
                if let Err(e) = chain.invoke(&mut request, &mut response) {
                    tracing::error!(request_id = %request.request_id(), error = %e, "Chain failed");
                    response = Response::new();
                    response.send_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
                }
                response
            })
        };

        match self.pool.submit(job).await {
            Ok(response) => response.into_http(),
            Err(PoolError::Saturated) => {
                let mut response = plain(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
                response.headers_mut().insert(RETRY_AFTER, HeaderValue::from_static("1"));
                response
            }
            Err(PoolError::ShutDown) => plain(StatusCode::SERVICE_UNAVAILABLE, "Server Shutting Down"),
            Err(PoolError::Panicked(_)) => plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        }
    }
}

/// axum fallback: every request goes through the dispatcher.
pub async fn handle(State(dispatcher): State<Arc<Dispatcher>>, request: axum::extract::Request) -> HttpResponse {
    dispatcher.dispatch(request).await
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, ProtocolError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ProtocolError::BodyTooLarge { limit }),
        Err(e) => Err(ProtocolError::Malformed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLimits, ResourceCache, ResourceLoader};
    use crate::config::ExecutorConfig;
    use crate::error::CacheLoadError;
    use crate::pipeline::{handler_fn, middleware_fn, PipelineRegistry};
    use crate::routing::MappingRule;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use tracing::Instrument;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;
    use tracing_subscriber::Layer;

    /// Records which thread entered each span.
    #[derive(Clone, Default)]
    struct SpanEntries(Arc<Mutex<Vec<(&'static str, ThreadId)>>>);

    impl<S> Layer<S> for SpanEntries
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_enter(&self, id: &tracing::span::Id, ctx: Context<'_, S>) {
            if let Some(span) = ctx.span(id) {
                self.0.lock().unwrap().push((span.name(), std::thread::current().id()));
            }
        }
    }

    struct CountingLoader(AtomicUsize);

    impl ResourceLoader for CountingLoader {
        fn load(&self, path: &str) -> Result<Option<Bytes>, CacheLoadError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok((path == "/index.html").then(|| Bytes::from_static(b"<h1>home</h1>")))
        }
    }

    fn dispatcher(registry: PipelineRegistry, loader: Arc<CountingLoader>) -> Dispatcher {
        let context = ServerContext::new("test", "", registry).unwrap();
        let pool = Arc::new(
            WorkerPool::new(&ExecutorConfig {
                core_pool_size: 2,
                max_pool_size: 4,
                queue_depth: 8,
                keep_alive_secs: 1,
            })
            .unwrap(),
        );
        let cache = Arc::new(ResourceCache::new(CacheLimits {
            max_entries: 100,
            max_bytes: 1 << 20,
            visit_queue_capacity: 16,
            idle_ttl: None,
        }));
        let statics = Arc::new(StaticHandler::new(StaticResources::new(cache, loader), "/index.html"));
        let app = handler_fn("app", |req, resp| {
            resp.set_content_type("text/plain");
            resp.write(format!("app:{}", req.path()).as_bytes());
            Ok(())
        });
        Dispatcher::new(
            context,
            pool,
            app,
            Some(statics),
            &StaticFilesConfig::default(),
            &HttpConfig {
                max_body_bytes: 16,
                ..HttpConfig::default()
            },
        )
    }

    fn request(method: Method, uri: &str, body: &'static str) -> axum::extract::Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_of(response: HttpResponse) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_static_detection() {
        let d = dispatcher(PipelineRegistry::new(), Arc::new(CountingLoader(AtomicUsize::new(0))));
        assert!(d.is_static(""));
        assert!(d.is_static("/"));
        assert!(d.is_static("/css/site.css"));
        assert!(d.is_static("/img/LOGO.PNG"));
        assert!(!d.is_static("/api/users"));
        assert!(!d.is_static("/dir.css/page"));
        assert!(!d.is_static("/.css"));
    }

    #[tokio::test]
    async fn test_root_serves_index_once() {
        let loader = Arc::new(CountingLoader(AtomicUsize::new(0)));
        let d = dispatcher(PipelineRegistry::new(), Arc::clone(&loader));

        let first = d.dispatch(request(Method::GET, "/", "")).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["content-type"], "text/html");
        assert_eq!(body_of(first).await, "<h1>home</h1>");

        let second = d.dispatch(request(Method::GET, "/index.html", "")).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);

        let missing = d.dispatch(request(Method::GET, "/nope.js", "")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let d = dispatcher(PipelineRegistry::new(), Arc::new(CountingLoader(AtomicUsize::new(0))));
        let response = d.dispatch(request(Method::TRACE, "/x", "")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let allow = response.headers()[ALLOW].to_str().unwrap();
        assert!(allow.starts_with("GET, POST"));
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let d = dispatcher(PipelineRegistry::new(), Arc::new(CountingLoader(AtomicUsize::new(0))));
        let response = d
            .dispatch(request(Method::POST, "/upload", "this body is longer than sixteen bytes"))
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_dynamic_path_reaches_app() {
        let d = dispatcher(PipelineRegistry::new(), Arc::new(CountingLoader(AtomicUsize::new(0))));
        let response = d.dispatch(request(Method::POST, "/api/items?id=1", "{}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "app:/api/items");
    }

    #[tokio::test]
    async fn test_middleware_failure_is_500() {
        let mut registry = PipelineRegistry::new();
        registry
            .register("broken", middleware_fn(|_req, _resp, _chain| Err("nope".into())))
            .unwrap();
        registry.add_mapping(MappingRule::for_url("broken", "/*"), true).unwrap();
        let d = dispatcher(registry, Arc::new(CountingLoader(AtomicUsize::new(0))));

        let response = d.dispatch(request(Method::GET, "/api", "")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_chain_runs_inside_request_span() {
        let entries = SpanEntries::default();
        let _default = tracing::subscriber::set_default(tracing_subscriber::registry().with(entries.clone()));
        let d = dispatcher(PipelineRegistry::new(), Arc::new(CountingLoader(AtomicUsize::new(0))));

        let span = tracing::info_span!("request", request_id = "req-1");
        let response = d.dispatch(request(Method::GET, "/api", "")).instrument(span).await;
        assert_eq!(response.status(), StatusCode::OK);

        let here = std::thread::current().id();
        let entries = entries.0.lock().unwrap();
        assert!(
            entries.iter().any(|(name, thread)| *name == "request" && *thread != here),
            "request span never entered on a worker thread: {entries:?}"
        );
    }
}
