//! Sources document: provider and pool definitions loaded at startup.

use std::collections::HashSet;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigurationError, Result};
use crate::pools::PoolDefinition;
use crate::providers::{CircuitBreakerConfig, ProviderDefinition, ProviderRegistry};

/// Top-level JSON document.
///
/// ```json
/// {
///   "circuit_breaker": { "failure_threshold": 5, "cooldown_secs": 60 },
///   "providers": [ { "id": "coingecko", "name": "CoinGecko", ... } ],
///   "pools": [ { "id": "crypto-prices", "members": [ { "provider_id": "coingecko" } ], ... } ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub providers: Vec<ProviderDefinition>,
    #[serde(default)]
    pub pools: Vec<PoolDefinition>,
}

impl SourcesConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SourcesConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        info!(
            "Loaded {} providers and {} pools from {}",
            config.providers.len(),
            config.pools.len(),
            path.display()
        );
        Ok(config)
    }

    /// Structural checks that need the whole document. Per-provider field
    /// checks happen when the registry is built.
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if self.providers.is_empty() {
            return Err(ConfigurationError::NoProviders);
        }

        let ids: HashSet<&str> = self.providers.iter().map(|p| p.id.as_str()).collect();
        for pool in &self.pools {
            if pool.members.is_empty() {
                return Err(ConfigurationError::EmptyPool(pool.id.clone()));
            }
            if let Some(member) = pool
                .members
                .iter()
                .find(|m| !ids.contains(m.provider_id.as_str()))
            {
                return Err(ConfigurationError::UnknownProvider {
                    pool: pool.id.clone(),
                    provider: member.provider_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn build_registry(&self) -> std::result::Result<ProviderRegistry, ConfigurationError> {
        ProviderRegistry::from_definitions(&self.providers, &self.circuit_breaker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::rotation::RotationStrategy;
    use std::io::Write;

    const SOURCES: &str = r#"{
        "circuit_breaker": { "failure_threshold": 3, "cooldown_secs": 30 },
        "providers": [
            {
                "id": "coingecko",
                "name": "CoinGecko",
                "category": "market_data",
                "base_url": "https://api.coingecko.com/api/v3",
                "endpoints": { "ping": "/ping", "price": "/simple/price" },
                "rate_limit": { "requests_per_minute": 30 },
                "priority": 10,
                "health_endpoint": "ping"
            },
            {
                "id": "cmc",
                "name": "CoinMarketCap",
                "category": "market_data",
                "base_url": "https://pro-api.coinmarketcap.com",
                "requires_auth": true,
                "auth": { "type": "header", "header_name": "X-CMC_PRO_API_KEY", "key": "secret" },
                "rate_limit": { "requests_per_day": 333, "extra_limits": { "30d": 10000 } }
            }
        ],
        "pools": [
            {
                "id": "crypto-prices",
                "name": "Crypto prices",
                "category": "market_data",
                "rotation_strategy": "priority",
                "members": [
                    { "provider_id": "coingecko", "priority": 10 },
                    { "provider_id": "cmc", "priority": 5, "weight": 3 }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_and_build() {
        let config = SourcesConfig::from_json(SOURCES).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.pools[0].rotation_strategy, RotationStrategy::Priority);
        assert_eq!(config.pools[0].members[1].weight, 3);
        assert!(config.pools[0].enabled);

        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), 2);
        let coingecko = registry.get("coingecko").unwrap();
        assert_eq!(coingecko.lock().probe_url(), "https://api.coingecko.com/api/v3/ping");
    }

    #[test]
    fn test_unknown_member_rejected() {
        let json = SOURCES.replace(r#""provider_id": "cmc""#, r#""provider_id": "kraken""#);
        let err = SourcesConfig::from_json(&json).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_empty_providers_rejected() {
        let err = SourcesConfig::from_json(r#"{ "providers": [] }"#).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NoProviders)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SOURCES.as_bytes()).unwrap();

        let config = SourcesConfig::load(file.path()).unwrap();
        assert_eq!(config.providers.len(), 2);

        assert!(SourcesConfig::load("/nonexistent/sources.json").is_err());
    }
}
