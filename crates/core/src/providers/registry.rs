//! Shared provider handles and the process-wide provider registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{info, warn};

use super::circuit_breaker::CircuitBreakerConfig;
use super::definition::ProviderDefinition;
use super::model::{Provider, ProviderSnapshot, ProviderStatus};
use crate::errors::ConfigurationError;

/// Cheaply clonable, lock-protected reference to a provider.
///
/// Pools, the pool manager and the health checker all hold handles to the same
/// provider, so a failure reported through one path is visible to the others.
#[derive(Clone, Debug)]
pub struct ProviderHandle {
    id: Arc<str>,
    inner: Arc<Mutex<Provider>>,
}

impl ProviderHandle {
    pub fn new(provider: Provider) -> Self {
        Self {
            id: Arc::from(provider.id.as_str()),
            inner: Arc::new(Mutex::new(provider)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lock the provider, recovering from poison if necessary.
    ///
    /// A poisoned provider only means stats may be slightly off.
    pub fn lock(&self) -> MutexGuard<'_, Provider> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Provider '{}' mutex was poisoned, recovering", self.id);
            poisoned.into_inner()
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Provider) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn is_available(&self) -> bool {
        self.lock().is_available()
    }

    pub fn status(&self) -> ProviderStatus {
        self.lock().status()
    }

    pub fn record_success(&self, response_time_ms: f64) {
        self.lock().record_success(response_time_ms);
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        self.lock().record_failure(error);
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        self.lock().snapshot()
    }

    pub fn ptr_eq(&self, other: &ProviderHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// All configured providers, keyed by id.
///
/// Built once at startup from provider definitions and shared by reference.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, ProviderHandle>>,
    order: RwLock<Vec<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Builds a registry, failing on the first invalid definition.
    pub fn from_definitions(
        definitions: &[ProviderDefinition],
        default_breaker: &CircuitBreakerConfig,
    ) -> Result<Self, ConfigurationError> {
        if definitions.is_empty() {
            return Err(ConfigurationError::NoProviders);
        }

        let registry = Self::new();
        for definition in definitions {
            let provider = definition.build(default_breaker)?;
            registry.insert(provider)?;
        }
        info!("Provider registry loaded {} providers", registry.len());
        Ok(registry)
    }

    pub fn insert(&self, provider: Provider) -> Result<ProviderHandle, ConfigurationError> {
        let mut providers = self.providers.write().unwrap_or_else(|p| p.into_inner());
        if providers.contains_key(&provider.id) {
            return Err(ConfigurationError::DuplicateProvider(provider.id));
        }
        let id = provider.id.clone();
        let handle = ProviderHandle::new(provider);
        providers.insert(id.clone(), handle.clone());
        self.order
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(id);
        Ok(handle)
    }

    /// Explicit administrative removal.
    pub fn remove(&self, provider_id: &str) -> Option<ProviderHandle> {
        let removed = self
            .providers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(provider_id);
        if removed.is_some() {
            self.order
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .retain(|id| id != provider_id);
            info!("Provider '{}' removed from registry", provider_id);
        }
        removed
    }

    pub fn get(&self, provider_id: &str) -> Option<ProviderHandle> {
        self.providers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(provider_id)
            .cloned()
    }

    /// All handles in configuration order.
    pub fn all(&self) -> Vec<ProviderHandle> {
        let providers = self.providers.read().unwrap_or_else(|p| p.into_inner());
        self.order
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter_map(|id| providers.get(id).cloned())
            .collect()
    }

    pub fn by_category(&self, category: &str) -> Vec<ProviderHandle> {
        self.all()
            .into_iter()
            .filter(|h| h.lock().category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str, category: &str) -> ProviderDefinition {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": id.to_uppercase(),
            "category": category,
            "base_url": format!("https://{}.example.com", id),
        }))
        .unwrap()
    }

    #[test]
    fn test_from_definitions_keeps_order() {
        let registry = ProviderRegistry::from_definitions(
            &[
                definition("binance", "market_data"),
                definition("cryptopanic", "news"),
                definition("coincap", "market_data"),
            ],
            &CircuitBreakerConfig::default(),
        )
        .unwrap();

        let ids: Vec<_> = registry.all().iter().map(|h| h.id().to_string()).collect();
        assert_eq!(ids, vec!["binance", "cryptopanic", "coincap"]);
        assert_eq!(registry.by_category("market_data").len(), 2);
    }

    #[test]
    fn test_empty_and_duplicate_rejected() {
        assert_eq!(
            ProviderRegistry::from_definitions(&[], &CircuitBreakerConfig::default()).err(),
            Some(ConfigurationError::NoProviders)
        );

        let result = ProviderRegistry::from_definitions(
            &[definition("binance", "a"), definition("binance", "b")],
            &CircuitBreakerConfig::default(),
        );
        assert_eq!(
            result.err(),
            Some(ConfigurationError::DuplicateProvider("binance".to_string()))
        );
    }

    #[test]
    fn test_handles_share_state() {
        let registry = ProviderRegistry::new();
        let handle = registry
            .insert(Provider::new("kraken", "Kraken", "market_data", "https://api.kraken.com"))
            .unwrap();

        registry.get("kraken").unwrap().record_failure("HTTP 503");
        assert_eq!(handle.status(), ProviderStatus::Degraded);
        assert!(handle.ptr_eq(&registry.get("kraken").unwrap()));

        assert!(registry.remove("kraken").is_some());
        assert!(registry.get("kraken").is_none());
        assert!(registry.is_empty());
    }
}
