//! Background LRU crawler: active expiration.
//!
//! One crawler exists per cache, created disabled. When enabled it takes
//! the same lock as foreground requests for each bounded pass, then
//! sleeps outside the lock, so per-acquisition pause stays proportional
//! to `items_per_run`.

use crate::cache::lru::LruCache;
use crate::error::CrawlerError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Upper bound for the inter-pass sleep (1 second, in microseconds)
pub const MAX_SLEEP_US: u64 = 1_000_000;

#[derive(Debug, Clone, Copy)]
struct CrawlerState {
    enabled: bool,
    items_per_run: u32,
    sleep_us: u64,
}

/// Crawler control handle plus its background task state
pub struct Crawler {
    cache: Arc<Mutex<LruCache>>,
    state: Mutex<CrawlerState>,
    wake: Notify,
}

impl Crawler {
    /// Create a disabled crawler over the shared cache
    pub fn new(cache: Arc<Mutex<LruCache>>, items_per_run: u32, sleep_us: u64) -> Self {
        Self {
            cache,
            state: Mutex::new(CrawlerState {
                enabled: false,
                items_per_run,
                sleep_us: sleep_us.min(MAX_SLEEP_US),
            }),
            wake: Notify::new(),
        }
    }

    /// Start crawling. Rejected while `items_per_run` is zero.
    pub fn enable(&self) -> Result<(), CrawlerError> {
        let mut state = self.state.lock();
        if state.items_per_run == 0 {
            return Err(CrawlerError::ItemsPerRunZero);
        }
        state.enabled = true;
        self.wake.notify_one();
        Ok(())
    }

    /// Stop crawling after the current pass
    pub fn disable(&self) {
        self.state.lock().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Set the number of items scanned per pass
    pub fn set_items_per_run(&self, n: u32) {
        self.state.lock().items_per_run = n;
        self.wake.notify_one();
    }

    pub fn items_per_run(&self) -> u32 {
        self.state.lock().items_per_run
    }

    /// Set the inter-pass sleep; values outside [0, 1_000_000] µs are
    /// rejected without changing the current setting
    pub fn set_sleep(&self, sleep_us: u64) -> Result<(), CrawlerError> {
        if sleep_us > MAX_SLEEP_US {
            return Err(CrawlerError::SleepOutOfRange);
        }
        self.state.lock().sleep_us = sleep_us;
        Ok(())
    }

    pub fn sleep_us(&self) -> u64 {
        self.state.lock().sleep_us
    }

    /// Background task: bounded expiration passes until cancelled.
    ///
    /// While disabled (or with nothing to scan per pass) the task parks
    /// until a control command wakes it.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("LRU crawler task started");
        loop {
            let state = *self.state.lock();

            if !state.enabled || state.items_per_run == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.wake.notified() => continue,
                }
            }

            let reclaimed = self.cache.lock().crawl_step(state.items_per_run as usize);
            if reclaimed > 0 {
                debug!(reclaimed, "crawler reclaimed expired entries");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_micros(state.sleep_us)) => {}
            }
        }
        info!("LRU crawler task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn crawler_fixture(items_per_run: u32) -> (Arc<Crawler>, Arc<Mutex<LruCache>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = Arc::new(Mutex::new(LruCache::new(4096, clock.clone())));
        let crawler = Arc::new(Crawler::new(cache.clone(), items_per_run, 0));
        (crawler, cache, clock)
    }

    #[test]
    fn test_starts_disabled() {
        let (crawler, _, _) = crawler_fixture(10);
        assert!(!crawler.is_enabled());
    }

    #[test]
    fn test_enable_requires_items_per_run() {
        let (crawler, _, _) = crawler_fixture(0);
        assert_eq!(crawler.enable(), Err(CrawlerError::ItemsPerRunZero));
        assert!(!crawler.is_enabled());

        crawler.set_items_per_run(10);
        assert!(crawler.enable().is_ok());
        assert!(crawler.is_enabled());

        crawler.disable();
        assert!(!crawler.is_enabled());
    }

    #[test]
    fn test_set_sleep_range() {
        let (crawler, _, _) = crawler_fixture(10);
        assert!(crawler.set_sleep(0).is_ok());
        assert!(crawler.set_sleep(MAX_SLEEP_US).is_ok());
        assert_eq!(crawler.sleep_us(), MAX_SLEEP_US);
        // Out-of-range values leave the current setting untouched
        assert_eq!(
            crawler.set_sleep(MAX_SLEEP_US + 1),
            Err(CrawlerError::SleepOutOfRange)
        );
        assert_eq!(crawler.sleep_us(), MAX_SLEEP_US);
    }

    #[tokio::test]
    async fn test_run_reclaims_expired() {
        let (crawler, cache, clock) = crawler_fixture(10);
        {
            let mut c = cache.lock();
            for i in 0..30u8 {
                assert!(c.set(&[b'k', i], b"v".to_vec(), 0, 1_005, 0));
            }
            assert!(c.set(b"live", b"v".to_vec(), 0, 0, 0));
        }
        clock.set(2_000);

        crawler.enable().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(crawler.clone().run(cancel.clone()));

        // Bounded number of passes proportional to cache size / items_per_run
        for _ in 0..50 {
            if cache.lock().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.lock().len(), 1);
        assert!(cache.lock().get(b"live").is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_while_disabled() {
        let (crawler, _, _) = crawler_fixture(10);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(crawler.run(cancel.clone()));
        cancel.cancel();
        task.await.unwrap();
    }
}
