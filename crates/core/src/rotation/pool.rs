//! In-process provider pool.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;

use super::selector::{select, Candidate};
use super::strategy::RotationStrategy;
use crate::errors::ConfigurationError;
use crate::providers::{Provider, ProviderHandle, ProviderRegistry};
use crate::rate_limiter::RateLimiter;

impl Candidate for Provider {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    fn usage(&self) -> u64 {
        self.total_requests()
    }

    fn avg_response_time(&self) -> Option<f64> {
        Provider::avg_response_time(self)
    }
}

/// Selection inputs copied out of a provider while its lock is held.
struct ProviderView {
    priority: i32,
    weight: i32,
    usage: u64,
    avg_response_time: Option<f64>,
}

impl ProviderView {
    fn of(provider: &Provider) -> Self {
        Self {
            priority: provider.priority,
            weight: provider.weight,
            usage: provider.usage(),
            avg_response_time: Candidate::avg_response_time(provider),
        }
    }
}

impl Candidate for ProviderView {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn weight(&self) -> i32 {
        self.weight
    }

    fn usage(&self) -> u64 {
        self.usage
    }

    fn avg_response_time(&self) -> Option<f64> {
        self.avg_response_time
    }
}

struct PoolState {
    providers: Vec<ProviderHandle>,
    strategy: RotationStrategy,
    rotation_count: u64,
    cursor: u64,
}

impl PoolState {
    fn sort_if_priority(&mut self) {
        if self.strategy == RotationStrategy::Priority {
            // Stable, so equal priorities keep insertion order.
            self.providers
                .sort_by_key(|handle| std::cmp::Reverse(handle.lock().priority));
        }
    }
}

/// Ordered set of interchangeable providers with a rotation strategy.
///
/// Selection, the rotation counter and the chosen provider's usage update
/// happen under one lock, so concurrent callers never observe a half-applied
/// rotation.
///
/// A pool attached to the shared [`RateLimiter`] (see
/// [`ProviderPool::with_rate_limiter`]) skips providers that limiter reports
/// as limited and counts its selections there as well. Without one, only the
/// provider's own tracker sees the use.
pub struct ProviderPool {
    name: String,
    state: Mutex<PoolState>,
    limiter: Option<Arc<RateLimiter>>,
}

impl ProviderPool {
    /// Creates a pool; a pool without members is a configuration error.
    pub fn new(
        name: impl Into<String>,
        strategy: RotationStrategy,
        providers: Vec<ProviderHandle>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if providers.is_empty() {
            return Err(ConfigurationError::EmptyPool(name));
        }

        let mut state = PoolState {
            providers,
            strategy,
            rotation_count: 0,
            cursor: 0,
        };
        state.sort_if_priority();

        Ok(Self {
            name,
            state: Mutex::new(state),
            limiter: None,
        })
    }

    /// Shares quota accounting with the persisted pools using `limiter`.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Pool over every registered provider in `category`.
    pub fn for_category(
        registry: &ProviderRegistry,
        category: &str,
        strategy: RotationStrategy,
    ) -> Result<Self, ConfigurationError> {
        Self::new(category, strategy, registry.by_category(category))
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Pool '{}' mutex was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.lock_state().strategy
    }

    pub fn set_strategy(&self, strategy: RotationStrategy) {
        let mut state = self.lock_state();
        state.strategy = strategy;
        state.sort_if_priority();
        info!("Pool '{}' now rotates by {}", self.name, strategy);
    }

    pub fn rotation_count(&self) -> u64 {
        self.lock_state().rotation_count
    }

    pub fn providers(&self) -> Vec<ProviderHandle> {
        self.lock_state().providers.clone()
    }

    pub fn len(&self) -> usize {
        self.lock_state().providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn available_count(&self) -> usize {
        let now = Utc::now();
        self.lock_state()
            .providers
            .iter()
            .filter(|handle| handle.lock().is_available_at(now))
            .count()
    }

    pub fn add_provider(&self, handle: ProviderHandle) {
        let mut state = self.lock_state();
        if state.providers.iter().any(|p| p.id() == handle.id()) {
            debug!(
                "Provider '{}' already in pool '{}'",
                handle.id(),
                self.name
            );
            return;
        }
        state.providers.push(handle);
        state.sort_if_priority();
    }

    pub fn remove_provider(&self, provider_id: &str) -> Option<ProviderHandle> {
        let mut state = self.lock_state();
        let position = state.providers.iter().position(|p| p.id() == provider_id)?;
        Some(state.providers.remove(position))
    }

    /// Picks the next available provider, or `None` if every member is
    /// circuit-broken, rate limited or offline.
    pub fn get_next_provider(&self) -> Option<ProviderHandle> {
        self.get_next_provider_with(&mut rand::thread_rng())
    }

    pub fn get_next_provider_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ProviderHandle> {
        let now = Utc::now();
        let mut state = self.lock_state();

        let mut available = Vec::with_capacity(state.providers.len());
        let mut views = Vec::with_capacity(state.providers.len());
        for handle in &state.providers {
            let (view, name) = {
                let mut provider = handle.lock();
                if !provider.is_available_at(now) {
                    continue;
                }
                (ProviderView::of(&provider), provider.name.clone())
            };
            if let Some(limiter) = &self.limiter {
                if limiter.is_limited(&name) {
                    continue;
                }
            }
            views.push(view);
            available.push((handle.clone(), name));
        }

        let Some(selection) = select(state.strategy, &views, state.cursor, rng) else {
            warn!(
                "Pool '{}' exhausted: none of {} providers available",
                self.name,
                state.providers.len()
            );
            return None;
        };

        state.cursor = selection.cursor;
        state.rotation_count += 1;

        let (chosen, name) = available.swap_remove(selection.index);
        chosen.lock().record_use_at(now);
        if let Some(limiter) = &self.limiter {
            limiter.record(&name);
        }
        debug!(
            "Pool '{}' selected '{}' by {} (rotation {})",
            self.name, chosen.id(), state.strategy, state.rotation_count
        );
        Some(chosen)
    }
}
