//! Shape of `microweb.toml`.
//!
//! Each table maps to one struct below. Missing tables and keys take the
//! values from the matching `Default` impl, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::routing::{DispatchContext, MappingRule};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, backlog, TLS).
    pub listener: ListenerConfig,

    /// Worker pool sizing.
    pub executor: ExecutorConfig,

    /// Header-read and drain deadlines.
    pub timeouts: TimeoutConfig,

    /// Application context (name, path prefix).
    pub context: ContextConfig,

    /// Request acceptance rules.
    pub http: HttpConfig,

    /// Static resource resolution.
    pub static_files: StaticFilesConfig,

    /// Resource cache ceilings and sweeping.
    pub cache: CacheConfig,

    /// Log filter, log format and the optional Prometheus exporter.
    pub observability: ObservabilityConfig,

    /// Middleware definitions, resolved by kind at startup.
    pub middleware: Vec<MiddlewareConfig>,

    /// Mapping rules, in declaration order.
    pub mapping: Vec<MappingConfig>,
}

/// Where and how the server accepts sockets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,

    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,

    /// Pending-connection backlog passed to `listen(2)`.
    pub backlog: u32,

    /// Open connections allowed at once; further clients wait in the backlog.
    pub max_connections: usize,

    /// Serve HTTPS when present.
    pub tls: Option<TlsConfig>,
}

impl ListenerConfig {
    /// `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            backlog: 1024,
            max_connections: 10_000,
            tls: None,
        }
    }
}

/// PEM files for the rustls acceptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Certificate chain, leaf first.
    pub cert_path: String,

    /// PKCS#8, PKCS#1 or SEC1 private key.
    pub key_path: String,
}

/// Worker pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Long-lived worker threads.
    pub core_pool_size: usize,

    /// Upper bound on worker threads, transient ones included.
    pub max_pool_size: usize,

    /// Jobs that may wait for a free worker.
    pub queue_depth: usize,

    /// How long an idle transient worker waits for more work.
    pub keep_alive_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 100,
            max_pool_size: 1000,
            queue_depth: 100,
            keep_alive_secs: 5,
        }
    }
}

/// Deadlines applied by the transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to receive the request head.
    pub header_read_secs: u64,

    /// How long `stop()` waits for in-flight connections.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            header_read_secs: 300,
            shutdown_grace_secs: 30,
        }
    }
}

/// Application context.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    pub name: String,

    /// Prefix stripped from request paths; empty or `/` for the root.
    pub context_path: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            name: "microweb".to_string(),
            context_path: String::new(),
        }
    }
}

/// Request acceptance rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Methods that reach the pipeline; anything else gets 405.
    pub allowed_methods: Vec<String>,

    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Static resource resolution.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub enabled: bool,

    /// Directory resources are loaded from.
    pub root: String,

    /// Resource served for the empty path and `/`.
    pub index: String,

    /// File extensions (without the dot) treated as static.
    pub extensions: Vec<String>,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: "public".to_string(),
            index: "/index.html".to_string(),
            extensions: [
                "html", "htm", "css", "js", "mjs", "json", "txt", "xml", "png", "jpg", "jpeg", "gif", "svg",
                "ico", "webp", "woff", "woff2", "ttf", "map", "pdf",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl StaticFilesConfig {
    pub fn is_static_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Resource cache ceilings and sweeping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,

    /// Ceiling on key plus payload bytes across all entries.
    pub max_bytes: usize,

    /// Capacity of the lossy visit queue.
    pub visit_queue_capacity: usize,

    pub sweep_interval_secs: u64,

    /// Entries not read for this long are expired. Unset disables expiry.
    pub idle_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            visit_queue_capacity: 4096,
            sweep_interval_secs: 30,
            idle_ttl_secs: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging and metrics export.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Install the Prometheus exporter at startup.
    pub metrics_enabled: bool,

    /// Address the exporter's scrape endpoint listens on.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "microweb=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A named middleware instance built by the factory registered for `kind`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MiddlewareConfig {
    /// Unique id referenced by mappings.
    pub name: String,

    pub kind: String,

    /// Kind-specific parameters.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl MiddlewareConfig {
    /// A parameter rendered as a string; numbers and booleans are accepted.
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// A mapping rule as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MappingConfig {
    /// Middleware id this rule applies.
    pub middleware: String,

    pub url_pattern: Option<String>,

    pub handler_name: Option<String>,

    /// Dispatch contexts; empty means `REQUEST` only.
    #[serde(default)]
    pub dispatch: Vec<DispatchContext>,

    /// Append (true) or prepend (false) to the rule list.
    #[serde(default = "default_match_after")]
    pub match_after: bool,
}

fn default_match_after() -> bool {
    true
}

impl MappingConfig {
    pub fn to_rule(&self) -> MappingRule {
        MappingRule::new(
            self.middleware.clone(),
            self.url_pattern.clone(),
            self.handler_name.clone(),
        )
        .with_dispatch(self.dispatch.iter().copied())
    }
}
