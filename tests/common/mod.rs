//! Shared utilities for integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use microweb::cache::{FsLoader, ResourceLoader};
use microweb::config::ServerConfig;
use microweb::error::CacheLoadError;
use microweb::http::HttpServer;
use microweb::lifecycle::build_server;
use microweb::pipeline::{handler_fn, MiddlewareFactories};

pub const INDEX_HTML: &str = "<h1>microweb</h1>";
pub const SITE_CSS: &str = "body { margin: 0 }";

/// Filesystem loader that counts how often storage is consulted.
pub struct CountingLoader {
    inner: FsLoader,
    pub loads: AtomicUsize,
}

impl ResourceLoader for CountingLoader {
    fn load(&self, path: &str) -> Result<Option<Bytes>, CacheLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(path)
    }
}

/// A running server plus the counters tests assert on.
pub struct TestServer {
    pub server: HttpServer,
    pub addr: SocketAddr,
    pub loader: Arc<CountingLoader>,
    /// Times the application handler ran.
    pub app_calls: Arc<AtomicUsize>,
    _root: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn loads(&self) -> usize {
        self.loader.loads.load(Ordering::SeqCst)
    }

    pub fn app_calls(&self) -> usize {
        self.app_calls.load(Ordering::SeqCst)
    }

    pub async fn stop(mut self) {
        self.server.stop().await.unwrap();
    }
}

/// Write a self-signed certificate for `localhost` and its key under `dir`.
pub fn write_test_certs(dir: &Path) -> (PathBuf, PathBuf) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}

/// Loopback config with a small pool and short grace period.
pub fn local_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.host = "127.0.0.1".to_string();
    config.listener.port = 0;
    config.executor.core_pool_size = 4;
    config.executor.max_pool_size = 8;
    config.executor.queue_depth = 16;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// Start a server with a temp static root holding `index.html` and `css/site.css`.
///
/// The application handler echoes the path and the `id`/`flag` query
/// parameters; `/slow` sleeps for a second first.
pub async fn start_server(config: ServerConfig) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), INDEX_HTML).unwrap();
    std::fs::create_dir(root.path().join("css")).unwrap();
    std::fs::write(root.path().join("css/site.css"), SITE_CSS).unwrap();

    let loader = Arc::new(CountingLoader {
        inner: FsLoader::new(root.path()),
        loads: AtomicUsize::new(0),
    });

    let app_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&app_calls);
    let app = handler_fn("app", move |request, response| {
        calls.fetch_add(1, Ordering::SeqCst);
        if request.path() == "/slow" {
            std::thread::sleep(Duration::from_secs(1));
        }
        response.set_content_type("text/plain");
        response.write(
            format!(
                "path={} id={} flag={}",
                request.path(),
                request.param_values("id").join(","),
                request.param("flag").unwrap_or("-"),
            )
            .as_bytes(),
        );
        Ok(())
    });

    let mut server = build_server(config, &MiddlewareFactories::with_builtins(), app)
        .unwrap()
        .with_loader(Arc::clone(&loader) as Arc<dyn ResourceLoader>);
    let addr = server.start().await.unwrap();

    TestServer {
        server,
        addr,
        loader,
        app_calls,
        _root: root,
    }
}
