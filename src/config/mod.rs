//! Startup configuration.
//!
//! ```text
//! microweb.toml -> loader (toml + serde) -> validation -> ServerConfig
//! ```
//!
//! The validated `ServerConfig` is handed to `lifecycle::build_server` once
//! and never re-read; changing settings means restarting the process.
//! Serde catches type errors, `validate_config` catches values that parse but
//! cannot work together (an empty pool, a context path without a leading `/`).

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, ContextConfig, ExecutorConfig, HttpConfig, ListenerConfig, LogFormat, MappingConfig,
    MiddlewareConfig, ObservabilityConfig, ServerConfig, StaticFilesConfig, TimeoutConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
