//! In-memory LRU cache engine, clock seam, and background crawler

mod clock;
mod crawler;
mod item;
mod lru;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use crawler::{Crawler, MAX_SLEEP_US};
pub use item::{CacheItem, expire_at_from};
pub use lru::{CacheStats, LruCache};
