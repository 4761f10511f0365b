//! Request-to-middleware mapping.
//!
//! # Data Flow
//! ```text
//! Registration (setup):
//!     MappingRule (url pattern XOR handler name, dispatch contexts)
//!     → matcher::validate_url_pattern
//!     → appended/prepended to the registry's ordered rule list
//!
//! Per request:
//!     (path, handler name, dispatch context)
//!     → matcher::matches for every rule, in list order
//! ```
//!
//! # Design Decisions
//! - Rules are immutable once built
//! - Matching is a pure function of (rule, path, handler name)
//! - Empty dispatch set means `{REQUEST}`

pub mod mapping;
pub mod matcher;

pub use mapping::{DispatchContext, DispatchContexts, MappingRule};
