//! Cache items and expiration-time normalization.
//!
//! Exptime rules (memcached-compatible):
//! - 0 = never expire
//! - <= 2592000 (30 days) = relative seconds from now
//! - > 2592000 = absolute Unix timestamp
//! - negative = already expired

/// Maximum relative exptime value (30 days in seconds)
const MAX_RELATIVE_EXPTIME: i64 = 2_592_000;

/// A single stored entry. Exclusively owned by the cache engine; the
/// recency position lives in the engine's list, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    /// Key bytes (<= 250, validated at the protocol layer)
    pub key: Vec<u8>,
    /// Payload
    pub data: Vec<u8>,
    /// Opaque client tag stored alongside the data
    pub flags: u32,
    /// Absolute expiration timestamp (0 = never expire)
    pub expire_at: u64,
    /// CAS token (0 = unset)
    pub cas_unique: u64,
}

impl CacheItem {
    pub fn new(key: Vec<u8>, data: Vec<u8>, flags: u32, expire_at: u64, cas_unique: u64) -> Self {
        Self {
            key,
            data,
            flags,
            expire_at,
            cas_unique,
        }
    }

    /// Payload size counted against the cache capacity
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the item is expired at the given instant
    pub fn is_expired(&self, now: u64) -> bool {
        self.expire_at != 0 && self.expire_at <= now
    }

    /// Parse the payload as an unsigned decimal for incr/decr
    pub fn as_u64(&self) -> Option<u64> {
        std::str::from_utf8(&self.data).ok()?.trim().parse().ok()
    }
}

/// Normalize a wire exptime to an absolute Unix timestamp.
///
/// Zero stays zero (never expire). A negative value expires immediately.
pub fn expire_at_from(exptime: i64, now: u64) -> u64 {
    if exptime == 0 {
        0
    } else if exptime < 0 {
        // In the past already; epoch second 1 is expired from any "now"
        1
    } else if exptime <= MAX_RELATIVE_EXPTIME {
        now + exptime as u64
    } else {
        exptime as u64
    }
}
