//! microweb server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net::Listener ──▶ http::server (hyper, per connection)
//!                                            │
//!                                            ▼
//!                                      http::dispatch
//!                          method gate · body limit · static resolution
//!                                            │
//!                                            ▼
//!                                   worker::WorkerPool
//!                                            │
//!                                            ▼
//!                          pipeline::Chain (registry-built middlewares)
//!                                            │
//!                              ┌─────────────┴─────────────┐
//!                              ▼                           ▼
//!                     static handler                application handler
//!                   (cache::StaticResources)
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use microweb::config::{self, ServerConfig};
use microweb::http::NotFoundHandler;
use microweb::lifecycle::{build_server, shutdown_signal};
use microweb::observability::{logging, metrics};
use microweb::pipeline::MiddlewareFactories;

#[derive(Debug, Parser)]
#[command(name = "microweb", version, about = "Embeddable HTTP micro-server")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "microweb starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        bind_address = %config.listener.bind_address(),
        core_pool_size = config.executor.core_pool_size,
        max_pool_size = config.executor.max_pool_size,
        queue_depth = config.executor.queue_depth,
        middlewares = config.middleware.len(),
        mappings = config.mapping.len(),
        "Configuration loaded"
    );

    let mut server = build_server(config, &MiddlewareFactories::with_builtins(), Arc::new(NotFoundHandler))?;
    server.run_until(shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
