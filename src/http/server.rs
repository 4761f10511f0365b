//! HTTP server lifecycle and connection handling.
//!
//! # Responsibilities
//! - Bind the listener (explicit backlog, connection semaphore, optional TLS)
//! - Run the accept task and one HTTP/1.1 driver task per connection
//! - Wire up request-id and trace layers around the dispatcher
//! - Own the worker pool, the resource cache, and its sweeper
//! - Drive `Stopped → Starting → Listening → Draining → Stopped`
//!
//! # Design Decisions
//! - Connections are served by hyper directly so the header read timeout and
//!   graceful shutdown apply per connection
//! - The TLS handshake runs in the connection task, never in the accept loop
//! - `stop()` waits for open connections only up to the shutdown grace period

use axum::extract::ConnectInfo;
use axum::Router;
use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsAcceptor;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::cache::{sweeper, FsLoader, ResourceCache, ResourceLoader, StaticResources};
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::http::dispatch::{self, Dispatcher, StaticHandler};
use crate::http::request::RequestUuid;
use crate::http::ServerState;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{tls, ConnectionTracker, Listener, ListenerError};
use crate::observability;
use crate::pipeline::Handler;
use crate::worker::WorkerPool;

/// Resources that only exist while the server is listening.
struct Running {
    local_addr: SocketAddr,
    shutdown: Arc<Shutdown>,
    tracker: ConnectionTracker,
    pool: Arc<WorkerPool>,
    accept: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// The HTTP transport for one [`ServerContext`].
pub struct HttpServer {
    config: ServerConfig,
    context: Arc<ServerContext>,
    app: Arc<dyn Handler>,
    loader: Arc<dyn ResourceLoader>,
    cache: Arc<ResourceCache>,
    state: ServerState,
    running: Option<Running>,
}

impl HttpServer {
    /// Create a stopped server. Static resources load from `static_files.root`.
    pub fn new(config: ServerConfig, context: Arc<ServerContext>, app: Arc<dyn Handler>) -> Self {
        let loader: Arc<dyn ResourceLoader> = Arc::new(FsLoader::new(&config.static_files.root));
        let cache = Arc::new(ResourceCache::from_config(&config.cache));
        Self {
            config,
            context,
            app,
            loader,
            cache,
            state: ServerState::Stopped,
            running: None,
        }
    }

    /// Replace the storage behind the static resource cache.
    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Open connections while listening.
    pub fn active_connections(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.tracker.active_count())
    }

    /// Bind and begin accepting traffic. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.state != ServerState::Stopped {
            return Err(ServerError::InvalidState(self.state));
        }
        self.state = ServerState::Starting;

        match self.launch().await {
            Ok(running) => {
                let addr = running.local_addr;
                self.running = Some(running);
                self.context.initialize();
                self.state = ServerState::Listening;
                tracing::info!(
                    address = %addr,
                    context = %self.context.name(),
                    context_path = %self.context.context_path(),
                    tls = self.config.listener.tls.is_some(),
                    "HTTP server listening"
                );
                Ok(addr)
            }
            Err(e) => {
                self.state = ServerState::Stopped;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<Running, ServerError> {
        let acceptor = match &self.config.listener.tls {
            Some(tls_config) => Some(tls::build_acceptor(tls_config).await.map_err(ServerError::Tls)?),
            None => None,
        };

        let listener = Listener::bind(&self.config.listener).await.map_err(|e| match e {
            ListenerError::Bind(source) => ServerError::Bind {
                addr: self.config.listener.bind_address(),
                source,
            },
            other => ServerError::Io(std::io::Error::other(other)),
        })?;
        let local_addr = listener.local_addr()?;

        let pool = Arc::new(WorkerPool::new(&self.config.executor)?);

        let static_handler = self.config.static_files.enabled.then(|| {
            let resources = StaticResources::new(Arc::clone(&self.cache), Arc::clone(&self.loader));
            Arc::new(StaticHandler::new(resources, self.config.static_files.index.clone()))
        });
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.context),
            Arc::clone(&pool),
            Arc::clone(&self.app),
            static_handler,
            &self.config.static_files,
            &self.config.http,
        ));
        let router = build_router(dispatcher);

        let shutdown = Arc::new(Shutdown::new());
        let tracker = ConnectionTracker::new();

        let sweeper = sweeper::spawn(
            Arc::clone(&self.cache),
            Duration::from_secs(self.config.cache.sweep_interval_secs),
            shutdown.subscribe(),
        );

        let accept = tokio::spawn(accept_loop(
            listener,
            router,
            acceptor,
            tracker.clone(),
            Arc::clone(&shutdown),
            Duration::from_secs(self.config.timeouts.header_read_secs),
        ));

        Ok(Running {
            local_addr,
            shutdown,
            tracker,
            pool,
            accept,
            sweeper,
        })
    }

    /// Stop accepting, drain connections and workers, then fire `context_destroyed`.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        let Some(running) = self.running.take() else {
            return Err(ServerError::InvalidState(self.state));
        };
        self.state = ServerState::Draining;
        tracing::info!(
            active_connections = running.tracker.active_count(),
            "Draining HTTP server"
        );

        running.shutdown.trigger();
        if let Err(e) = running.accept.await {
            tracing::error!(error = %e, "Accept task ended abnormally");
        }

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if !running.tracker.wait_for_idle(grace).await {
            tracing::warn!(
                remaining = running.tracker.active_count(),
                grace_secs = grace.as_secs(),
                "Connections still open after grace period"
            );
        }

        let pool = Arc::clone(&running.pool);
        if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
            tracing::error!(error = %e, "Worker pool shutdown failed");
        }
        if let Err(e) = running.sweeper.await {
            tracing::error!(error = %e, "Cache sweeper ended abnormally");
        }

        self.context.destroy();
        self.state = ServerState::Stopped;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Start if needed, serve until `signal` resolves, then stop.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        if self.state == ServerState::Stopped {
            self.start().await?;
        }
        signal.await;
        self.stop().await
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr())
            .field("context", &self.context.name())
            .finish()
    }
}

fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .fallback(dispatch::handle)
        .with_state(dispatcher)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(RequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                            observability::tracing::request_span(request)
                        }),
                )
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn accept_loop(
    listener: Listener,
    router: Router,
    acceptor: Option<RustlsAcceptor>,
    tracker: ConnectionTracker,
    shutdown: Arc<Shutdown>,
    header_read: Duration,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait() => break,
        };

        let (stream, remote, permit) = match accepted {
            Ok(accepted) => accepted,
            Err(ListenerError::Closed) => break,
            Err(e) => {
                // Usually descriptor exhaustion; back off instead of spinning.
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        let guard = tracker.track(remote);
        let router = router.clone();
        let acceptor = acceptor.clone();
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            let _permit = permit;
            tracing::trace!(connection_id = %guard.id(), peer_addr = %guard.peer(), "Connection opened");
            match acceptor {
                Some(acceptor) => match acceptor.accept(stream, ()).await {
                    Ok((tls_stream, ())) => serve_connection(tls_stream, remote, router, header_read, &shutdown).await,
                    Err(e) => tracing::debug!(peer_addr = %remote, error = %e, "TLS handshake failed"),
                },
                None => serve_connection(stream, remote, router, header_read, &shutdown).await,
            }
            drop(guard);
        });
    }
    tracing::info!("Stopped accepting connections");
}

async fn serve_connection<S>(stream: S, remote: SocketAddr, router: Router, header_read: Duration, shutdown: &Shutdown)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = tower::service_fn(move |mut request: axum::http::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(remote));
        router.clone().oneshot(request)
    });

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(header_read)
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service));
    let mut conn = std::pin::pin!(conn);
    let mut stopping = std::pin::pin!(shutdown.wait());
    let mut draining = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(peer_addr = %remote, error = %e, "Connection error");
                }
                break;
            }
            _ = stopping.as_mut(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineRegistry;
    use crate::http::NotFoundHandler;

    fn local_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.listener.host = "127.0.0.1".to_string();
        config.listener.port = 0;
        config.executor.core_pool_size = 2;
        config.executor.max_pool_size = 4;
        config.executor.queue_depth = 4;
        config.timeouts.shutdown_grace_secs = 1;
        config
    }

    fn server() -> HttpServer {
        let context = ServerContext::new("test", "", PipelineRegistry::new()).unwrap();
        HttpServer::new(local_config(), context, Arc::new(NotFoundHandler))
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let mut server = server();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());

        let addr = server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);

        assert!(matches!(
            server.start().await,
            Err(ServerError::InvalidState(ServerState::Listening))
        ));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_rejected() {
        let mut server = server();
        assert!(matches!(
            server.stop().await,
            Err(ServerError::InvalidState(ServerState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let mut first = server();
        let addr = first.start().await.unwrap();

        let mut config = local_config();
        config.listener.port = addr.port();
        let context = ServerContext::new("second", "", PipelineRegistry::new()).unwrap();
        let mut second = HttpServer::new(config, context, Arc::new(NotFoundHandler));
        // SO_REUSEADDR does not allow two live listeners on one port.
        assert!(matches!(second.start().await, Err(ServerError::Bind { .. })));
        assert_eq!(second.state(), ServerState::Stopped);

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_tls_files() {
        let mut config = local_config();
        config.listener.tls = Some(crate::config::TlsConfig {
            cert_path: "/nope/cert.pem".to_string(),
            key_path: "/nope/key.pem".to_string(),
        });
        let context = ServerContext::new("tls", "", PipelineRegistry::new()).unwrap();
        let mut server = HttpServer::new(config, context, Arc::new(NotFoundHandler));
        assert!(matches!(server.start().await, Err(ServerError::Tls(_))));
    }
}
