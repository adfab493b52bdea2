use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A sliding-window rate limiter.
///
/// Each action class gets its own limiter with an independent window; the
/// key is caller-defined, typically the client's address.
pub struct RateLimiter {
    max_hits: usize,
    window: Duration,
    records: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_hits: usize, window: Duration) -> Self {
        Self {
            max_hits,
            window,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Returns whether the action is allowed, recording the hit if so.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut records = self.records.lock();

        let hits = records.entry(key.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < self.window);

        if hits.len() >= self.max_hits {
            return false;
        }

        hits.push(now);
        true
    }

    /// Drops stale windows. Called periodically so departed keys do not
    /// accumulate.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut records = self.records.lock();

        records.retain(|_, hits| {
            hits.retain(|t| now.duration_since(*t) < self.window);
            !hits.is_empty()
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));

        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        // Independent keys do not interfere.
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.allow("a"));
    }

    #[test]
    fn test_cleanup_drops_stale_keys() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));

        limiter.allow("a");
        std::thread::sleep(Duration::from_millis(30));
        limiter.cleanup();

        assert!(limiter.records.lock().is_empty());
    }

    #[test]
    fn test_cleanup_keeps_live_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));

        assert!(limiter.allow("a"));
        limiter.cleanup();

        // A capped key stays capped until its window actually slides.
        assert!(!limiter.allow("a"));
    }
}
