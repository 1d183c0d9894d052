//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use lethecache::prelude::*;
//! ```

// Error types
pub use crate::error::{CrawlerError, LetheError, ProtocolError, Result};

// Configuration
pub use crate::config::{CacheConfig, Config, CrawlerConfig, MetricsConfig, ServerConfig};

// Cache engine
pub use crate::cache::{Clock, Crawler, LruCache, SharedClock, SystemClock};

// Protocol
pub use crate::protocol::{Command, ParseResult, ResponseWriter};

// Metrics
pub use crate::metrics::Metrics;

// Server
pub use crate::server::Server;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
