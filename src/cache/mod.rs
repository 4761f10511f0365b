//! Static resource caching.
//!
//! # Data Flow
//! ```text
//! static handler → StaticResources::fetch
//!     → ResourceCache (DashMap) ── hit ──→ bytes / known-missing
//!     → miss → ResourceLoader (filesystem) → ResourceCache::put
//!
//! sweeper task (interval or ceiling pressure)
//!     → ResourceCache::sweep → idle expiry → coldest-first eviction
//! ```

pub mod static_files;
pub mod store;
pub mod sweeper;

pub use static_files::{FsLoader, ResourceLoader, StaticResources};
pub use store::{CacheLimits, CacheStats, Lookup, ResourceCache};
