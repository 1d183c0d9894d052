//! Size-bounded LRU cache engine.
//!
//! A `HashMap` index over a slab-backed intrusive doubly-linked recency
//! list (index links instead of pointers, no unsafe). List head is the
//! least-recently-used entry, tail the most-recently-used.
//!
//! Capacity is accounted in payload bytes: at all times
//! `remaining + sum of live item sizes == capacity`, and every live key
//! has exactly one recency node.
//!
//! The engine does no I/O and is not internally synchronized; callers
//! wrap it in a single mutex shared with the crawler.

use crate::cache::clock::SharedClock;
use crate::cache::item::CacheItem;
use std::collections::HashMap;

/// Entries evicted per batch when a set needs room
const EVICTION_BATCH: usize = 50;

/// Index into the recency slab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotIdx(u32);

/// A recency-list node owning its item
#[derive(Debug)]
struct Node {
    item: CacheItem,
    prev: Option<SlotIdx>,
    next: Option<SlotIdx>,
}

/// Engine-level counters, surfaced through the `stats` command
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Items stored over the lifetime of the cache
    pub total_items: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries removed on access after their exptime passed
    pub expired: u64,
    /// Entries reclaimed by the crawler
    pub crawler_reclaimed: u64,
}

/// The LRU cache engine
pub struct LruCache {
    capacity: u64,
    remaining: u64,
    index: HashMap<Vec<u8>, SlotIdx>,
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
    /// Least-recently-used end
    head: Option<SlotIdx>,
    /// Most-recently-used end
    tail: Option<SlotIdx>,
    /// Crawler scan position, LRU to MRU with wraparound
    crawl_cursor: Option<SlotIdx>,
    next_cas: u64,
    stats: CacheStats,
    clock: SharedClock,
}

impl LruCache {
    /// Create an engine bounded to `capacity` payload bytes
    pub fn new(capacity: u64, clock: SharedClock) -> Self {
        Self {
            capacity,
            remaining: capacity,
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            crawl_cursor: None,
            next_cas: 1,
            stats: CacheStats::default(),
            clock,
        }
    }

    /// Look up a key, expiring it passively if its time has passed.
    ///
    /// A live hit is promoted to most-recently-used.
    pub fn get(&mut self, key: &[u8]) -> Option<&CacheItem> {
        let idx = *self.index.get(key)?;
        if self.node(idx).item.is_expired(self.clock.now()) {
            self.remove_idx(idx);
            self.stats.expired += 1;
            return None;
        }
        self.promote(idx);
        Some(&self.node(idx).item)
    }

    /// Store an item, evicting from the LRU end in fixed batches when a
    /// new key does not fit.
    ///
    /// Returns `false` (leaving the cache unmodified) if the payload
    /// cannot fit even with the rest of the store evicted.
    pub fn set(
        &mut self,
        key: &[u8],
        data: Vec<u8>,
        flags: u32,
        expire_at: u64,
        cas_unique: u64,
    ) -> bool {
        let need = data.len() as u64;

        while self.room_for(key) < need {
            if self.evict_for(key, need, EVICTION_BATCH) == 0 {
                break;
            }
        }
        if self.room_for(key) < need {
            return false;
        }

        if let Some(&idx) = self.index.get(key) {
            let old_size = self.node(idx).item.size();
            let item = &mut self.node_mut(idx).item;
            item.data = data;
            item.flags = flags;
            item.expire_at = expire_at;
            item.cas_unique = cas_unique;
            self.remaining = self.remaining + old_size - need;
            self.promote(idx);
        } else {
            let item = CacheItem::new(key.to_vec(), data, flags, expire_at, cas_unique);
            let idx = self.push_mru(item);
            self.index.insert(key.to_vec(), idx);
            self.remaining -= need;
        }
        self.stats.total_items += 1;
        true
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.index.get(key) {
            Some(&idx) => {
                self.remove_idx(idx);
                true
            }
            None => false,
        }
    }

    /// Drop every entry, restoring the full capacity
    pub fn flush_all(&mut self) {
        self.prune(usize::MAX);
    }

    /// Stamp a new CAS token on an existing key without touching its
    /// value or recency position. Returns whether the key was present.
    pub fn set_cas(&mut self, key: &[u8], cas_unique: u64) -> bool {
        match self.index.get(key) {
            Some(&idx) => {
                self.node_mut(idx).item.cas_unique = cas_unique;
                true
            }
            None => false,
        }
    }

    /// Mint a fresh CAS token; monotonic and never zero
    pub fn mint_cas(&mut self) -> u64 {
        let token = self.next_cas;
        self.next_cas += 1;
        token
    }

    /// Unused payload capacity in bytes
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Configured payload capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// One crawler pass: scan up to `max_items` entries from the current
    /// cursor toward the MRU end, wrapping to the LRU end, removing
    /// expired entries. Returns the number reclaimed.
    pub fn crawl_step(&mut self, max_items: usize) -> usize {
        let now = self.clock.now();
        let mut cursor = self.crawl_cursor.or(self.head);
        let mut removed = 0;

        for _ in 0..max_items {
            let idx = match cursor.or(self.head) {
                Some(idx) => idx,
                None => break, // store is empty
            };
            let next = self.node(idx).next;
            if self.node(idx).item.is_expired(now) {
                self.remove_idx(idx);
                removed += 1;
            }
            cursor = next;
        }

        self.crawl_cursor = cursor;
        self.stats.crawler_reclaimed += removed as u64;
        removed
    }

    // -- Removal primitives --

    /// Evict from the LRU end until `need` bytes fit for `key`, removing
    /// at most `max` entries per call. The key being stored is never
    /// evicted; its bytes are reclaimed by the overwrite itself.
    /// Returns the number removed.
    fn evict_for(&mut self, key: &[u8], need: u64, max: usize) -> usize {
        let mut removed = 0;
        let mut cursor = self.head;

        while removed < max && self.room_for(key) < need {
            let idx = match cursor {
                Some(idx) => idx,
                None => break,
            };
            cursor = self.node(idx).next;
            if self.node(idx).item.key == key {
                continue;
            }
            self.remove_idx(idx);
            removed += 1;
        }

        self.stats.evictions += removed as u64;
        removed
    }

    /// Remove up to `max` entries from the LRU end unconditionally.
    /// Not counted as evictions; flush is an administrative clear.
    fn prune(&mut self, max: usize) -> usize {
        let mut removed = 0;
        while removed < max {
            let idx = match self.head {
                Some(idx) => idx,
                None => break,
            };
            self.remove_idx(idx);
            removed += 1;
        }
        removed
    }

    // -- Intrusive list plumbing --

    fn node(&self, idx: SlotIdx) -> &Node {
        self.slots[idx.0 as usize].as_ref().expect("dangling SlotIdx")
    }

    fn node_mut(&mut self, idx: SlotIdx) -> &mut Node {
        self.slots[idx.0 as usize].as_mut().expect("dangling SlotIdx")
    }

    /// Append a fresh node at the MRU end
    fn push_mru(&mut self, item: CacheItem) -> SlotIdx {
        let node = Node {
            item,
            prev: self.tail,
            next: None,
        };
        let idx = if let Some(free) = self.free.pop() {
            self.slots[free as usize] = Some(node);
            SlotIdx(free)
        } else {
            let raw = u32::try_from(self.slots.len()).expect("slab overflow");
            self.slots.push(Some(node));
            SlotIdx(raw)
        };

        if let Some(old_tail) = self.tail {
            self.node_mut(old_tail).next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        idx
    }

    /// Unlink a node, drop it from the index, and release its bytes
    fn remove_idx(&mut self, idx: SlotIdx) {
        let node = self.slots[idx.0 as usize]
            .take()
            .expect("remove_idx on vacant slot");

        match (node.prev, node.next) {
            (Some(p), Some(n)) => {
                self.node_mut(p).next = Some(n);
                self.node_mut(n).prev = Some(p);
            }
            (None, Some(n)) => {
                self.node_mut(n).prev = None;
                self.head = Some(n);
            }
            (Some(p), None) => {
                self.node_mut(p).next = None;
                self.tail = Some(p);
            }
            (None, None) => {
                self.head = None;
                self.tail = None;
            }
        }

        if self.crawl_cursor == Some(idx) {
            self.crawl_cursor = node.next;
        }
        self.free.push(idx.0);
        self.index.remove(&node.item.key);
        self.remaining += node.item.size();
    }

    /// Move an existing node to the MRU end
    fn promote(&mut self, idx: SlotIdx) {
        if self.tail == Some(idx) {
            return;
        }

        let (prev, next) = {
            let n = self.node(idx);
            (n.prev, n.next)
        };

        // Unlink from the current position
        match (prev, next) {
            (Some(p), Some(n)) => {
                self.node_mut(p).next = Some(n);
                self.node_mut(n).prev = Some(p);
            }
            (None, Some(n)) => {
                self.node_mut(n).prev = None;
                self.head = Some(n);
            }
            _ => return, // single element, already the tail
        }

        if self.crawl_cursor == Some(idx) {
            self.crawl_cursor = next;
        }

        // Re-link at the tail
        if let Some(old_tail) = self.tail {
            self.node_mut(old_tail).next = Some(idx);
        }
        let old_tail = self.tail;
        let node = self.node_mut(idx);
        node.prev = old_tail;
        node.next = None;
        self.tail = Some(idx);
    }

    /// Room available to store `key`: free bytes plus whatever the key's
    /// current payload would release on overwrite
    fn room_for(&self, key: &[u8]) -> u64 {
        let freed = self
            .index
            .get(key)
            .map_or(0, |&idx| self.node(idx).item.size());
        self.remaining + freed
    }

    /// Assert the structural invariants; test support
    #[cfg(test)]
    fn check_invariants(&self) {
        let mut used = 0u64;
        let mut seen = 0usize;
        let mut cursor = self.head;
        let mut prev: Option<SlotIdx> = None;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            assert_eq!(node.prev, prev, "broken prev link");
            assert_eq!(self.index.get(&node.item.key), Some(&idx), "index mismatch");
            used += node.item.size();
            seen += 1;
            prev = Some(idx);
            cursor = node.next;
        }
        assert_eq!(self.tail, prev, "tail mismatch");
        assert_eq!(seen, self.index.len(), "list/index length mismatch");
        assert_eq!(self.remaining + used, self.capacity, "capacity leak");
    }
}
