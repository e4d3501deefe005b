//! Per-domain request throttling shared by every connector.
//!
//! Each domain has a minimum interval between consecutive requests. Callers
//! reserve the next free slot while holding the lock and then sleep outside
//! it, so concurrent callers for the same domain are spaced out without
//! serializing on the mutex.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Interval applied to domains without an explicit setting.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Default)]
struct LimiterState {
    intervals: HashMap<String, Duration>,
    next_slot: HashMap<String, Instant>,
}

/// Process-wide throttle keyed by domain. Share it as `Arc<RateLimiter>`.
pub struct RateLimiter {
    default_interval: Duration,
    state: Mutex<LimiterState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_interval", &self.default_interval)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn with_interval(self, domain: impl Into<String>, interval: Duration) -> Self {
        self.set_interval(domain, interval);
        self
    }

    // A panic while holding the lock leaves the maps consistent, so poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the minimum interval between requests to `domain`.
    pub fn set_interval(&self, domain: impl Into<String>, interval: Duration) {
        self.state().intervals.insert(domain.into(), interval);
    }

    pub fn interval_for(&self, domain: &str) -> Duration {
        self.state()
            .intervals
            .get(domain)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Wait until a request to `domain` is allowed.
    pub async fn acquire(&self, domain: &str) {
        let wait_until = {
            let mut state = self.state();
            let interval = state
                .intervals
                .get(domain)
                .copied()
                .unwrap_or(self.default_interval);
            let now = Instant::now();
            let slot = match state.next_slot.get(domain) {
                Some(next) if *next > now => *next,
                _ => now,
            };
            state.next_slot.insert(domain.to_string(), slot + interval);
            slot
        };

        let now = Instant::now();
        if wait_until > now {
            debug!(
                target: "scholar.rate_limit",
                domain,
                wait_ms = (wait_until - now).as_millis() as u64,
                "Throttling request"
            );
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Forget every reserved slot. Configured intervals are kept.
    pub fn reset(&self) {
        self.state().next_slot.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let start = Instant::now();
        limiter.acquire("export.arxiv.org").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_domain_is_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(1))
            .with_interval("export.arxiv.org", Duration::from_secs(3));
        let start = Instant::now();
        limiter.acquire("export.arxiv.org").await;
        limiter.acquire("export.arxiv.org").await;
        limiter.acquire("export.arxiv.org").await;
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_domains_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire("a.example").await;
        limiter.acquire("b.example").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_get_distinct_slots() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire("api.crossref.org").await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap() - start);
        }
        finished.sort();
        for (i, elapsed) in finished.iter().enumerate() {
            let slot = Duration::from_millis(500 * i as u64);
            assert!(*elapsed >= slot, "caller {} woke early: {:?}", i, elapsed);
            assert!(*elapsed < slot + Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_slots() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        limiter.acquire("x").await;
        limiter.reset();
        let start = Instant::now();
        limiter.acquire("x").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.interval_for("x"), Duration::from_secs(10));
    }
}
