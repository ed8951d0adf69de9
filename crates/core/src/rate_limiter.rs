//! Fixed-window rate limiter keyed by provider name.
//!
//! The pool manager consults this limiter to skip providers that have used up
//! their quota. Each name gets its own [`RateLimitTracker`]; windows start on
//! the first request after a reset and are not aligned to wall-clock
//! boundaries. Names without configured limits are never limited.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use crate::errors::ConfigurationError;
use crate::providers::{ProviderRegistry, RateLimitConfig, RateLimitSnapshot, RateLimitTracker};

/// Upper bound on a single sleep inside [`RateLimiter::acquire`].
const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

/// Thread-safe limiter holding one tracker per provider name.
pub struct RateLimiter {
    trackers: Mutex<HashMap<String, RateLimitTracker>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter configured with every registered provider's ceilings.
    pub fn from_registry(registry: &ProviderRegistry) -> Self {
        let configs: Vec<(String, RateLimitConfig)> = registry
            .all()
            .iter()
            .map(|handle| {
                let provider = handle.lock();
                (provider.name.clone(), provider.rate_limit().config().clone())
            })
            .collect();

        let limiter = Self::new();
        {
            let mut trackers = limiter.lock_trackers();
            for (name, config) in configs {
                // Already validated when the provider was built.
                if let Ok(tracker) = RateLimitTracker::new(config) {
                    trackers.insert(name, tracker);
                }
            }
            info!("Rate limiter configured for {} providers", trackers.len());
        }
        limiter
    }

    /// Lock the trackers mutex, recovering from poison if necessary.
    fn lock_trackers(&self) -> MutexGuard<'_, HashMap<String, RateLimitTracker>> {
        self.trackers.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Sets (or replaces) the limits for `name`, discarding its usage.
    pub fn configure(&self, name: &str, config: RateLimitConfig) -> Result<(), ConfigurationError> {
        let tracker = RateLimitTracker::new(config)?;
        self.lock_trackers().insert(name.to_string(), tracker);
        Ok(())
    }

    /// Counts one request against `name`.
    pub fn record(&self, name: &str) {
        if let Some(tracker) = self.lock_trackers().get_mut(name) {
            tracker.increment();
        }
    }

    pub fn is_limited(&self, name: &str) -> bool {
        self.lock_trackers()
            .get(name)
            .is_some_and(RateLimitTracker::is_limited)
    }

    /// Records a request if `name` has headroom.
    pub fn try_acquire(&self, name: &str) -> bool {
        let mut trackers = self.lock_trackers();
        match trackers.get_mut(name) {
            Some(tracker) if tracker.is_limited() => false,
            Some(tracker) => {
                tracker.increment();
                true
            }
            None => true,
        }
    }

    /// Waits until `name` has headroom, then records the request.
    pub async fn acquire(&self, name: &str) {
        loop {
            let wait = {
                let mut trackers = self.lock_trackers();
                let Some(tracker) = trackers.get_mut(name) else {
                    return;
                };
                if !tracker.is_limited() {
                    tracker.increment();
                    return;
                }
                let now = Utc::now();
                tracker
                    .reset_time_at(now)
                    .and_then(|reset| (reset - now).to_std().ok())
                    .unwrap_or(Duration::from_millis(10))
            };

            let wait = wait.min(MAX_WAIT_SLICE).max(Duration::from_millis(1));
            debug!("Rate limiter: waiting {:?} for '{}'", wait, name);
            tokio::time::sleep(wait).await;
        }
    }

    pub fn snapshot(&self, name: &str) -> Option<RateLimitSnapshot> {
        self.lock_trackers().get(name).map(RateLimitTracker::snapshot)
    }

    /// Clears usage for `name`, keeping its limits.
    pub fn reset(&self, name: &str) {
        let mut trackers = self.lock_trackers();
        if let Some(tracker) = trackers.get_mut(name) {
            if let Ok(fresh) = RateLimitTracker::new(tracker.config().clone()) {
                *tracker = fresh;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Provider, RateLimitTracker};

    #[test]
    fn test_unconfigured_never_limited() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.try_acquire("anything"));
        }
        assert!(!limiter.is_limited("anything"));
        assert!(limiter.snapshot("anything").is_none());
    }

    #[test]
    fn test_configured_limit_and_reset() {
        let limiter = RateLimiter::new();
        limiter
            .configure("CoinGecko", RateLimitConfig::per_minute(2))
            .unwrap();

        assert!(limiter.try_acquire("CoinGecko"));
        limiter.record("CoinGecko");
        assert!(limiter.is_limited("CoinGecko"));
        assert!(!limiter.try_acquire("CoinGecko"));

        let snapshot = limiter.snapshot("CoinGecko").unwrap();
        assert!(snapshot.limited);
        assert_eq!(snapshot.current_usage, 2);

        limiter.reset("CoinGecko");
        assert!(!limiter.is_limited("CoinGecko"));
    }

    #[test]
    fn test_names_isolated() {
        let limiter = RateLimiter::new();
        limiter.configure("A", RateLimitConfig::per_minute(1)).unwrap();
        limiter.configure("B", RateLimitConfig::per_minute(1)).unwrap();

        limiter.record("A");
        assert!(limiter.is_limited("A"));
        assert!(!limiter.is_limited("B"));
    }

    #[test]
    fn test_from_registry_uses_provider_names() {
        let registry = ProviderRegistry::new();
        registry
            .insert(
                Provider::new("cmc", "CoinMarketCap", "market_data", "https://pro-api.coinmarketcap.com")
                    .with_rate_limit(RateLimitTracker::new(RateLimitConfig::per_minute(1)).unwrap()),
            )
            .unwrap();

        let limiter = RateLimiter::from_registry(&registry);
        assert!(limiter.try_acquire("CoinMarketCap"));
        assert!(limiter.is_limited("CoinMarketCap"));
        assert!(!limiter.is_limited("cmc"));
    }

    #[tokio::test]
    async fn test_acquire_returns_when_free() {
        let limiter = RateLimiter::new();
        limiter
            .configure("fast", RateLimitConfig::per_minute(3))
            .unwrap();

        limiter.acquire("fast").await;
        limiter.acquire("fast").await;
        assert_eq!(limiter.snapshot("fast").unwrap().current_usage, 2);

        limiter.acquire("unknown").await;
    }
}
