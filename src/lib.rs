//! # LetheCache
//!
//! In-memory, size-bounded LRU cache server speaking the memcached ASCII
//! protocol.
//!
//! *Lethe* (λήθη) is the Greek river of forgetting - items you stop
//! touching drift toward the LRU end and are forgotten.
//!
//! ## Features
//!
//! - Memcached ASCII protocol: storage (set/add/replace/append/prepend/cas),
//!   retrieval (get/gets), delete, touch, incr/decr, flush_all, stats,
//!   version, quit
//! - Byte-capacity bound with batched least-recently-used eviction
//! - Passive expiration on access plus an opt-in background LRU crawler
//!   driven by `lru_crawler` commands
//! - CAS tokens minted per `gets` for optimistic concurrency
//! - Prometheus metrics endpoint and health checks for load balancers
//!
//! ## Example
//!
//! ```ignore
//! use lethecache::cache::{LruCache, SystemClock};
//! use lethecache::config::Config;
//! use lethecache::server::Server;
//!
//! let config = Config::default();
//! let cache = LruCache::new(config.cache.capacity_bytes, Arc::new(SystemClock));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────────────────────────┐
//! │ app/service  │────▶│ LetheCache                          │
//! │ (memcache    │     │  ├─ ASCII protocol framing/parsing  │
//! │  client)     │     │  ├─ LRU engine (single mutex)       │
//! └──────────────┘     │  └─ background LRU crawler          │
//!                      └─────────────────────────────────────┘
//! ```

// Modules
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod prelude;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use error::{CrawlerError, LetheError, ProtocolError, Result};
