//! Provider definitions as supplied by the configuration loader.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::circuit_breaker::CircuitBreakerConfig;
use super::model::{Provider, ProviderAuth, DEFAULT_TIMEOUT_MS};
use super::rate_limit::{RateLimitConfig, RateLimitTracker};
use crate::errors::ConfigurationError;

fn default_weight() -> i32 {
    1
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Declarative description of one upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub id: String,
    pub name: String,
    pub category: String,
    pub base_url: String,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub auth: ProviderAuth,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub health_endpoint: Option<String>,
    /// Overrides the registry-wide breaker settings for this provider.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl ProviderDefinition {
    /// Validates the definition and builds the runtime provider.
    pub fn build(
        &self,
        default_breaker: &CircuitBreakerConfig,
    ) -> Result<Provider, ConfigurationError> {
        self.validate()?;

        let tracker = RateLimitTracker::new(self.rate_limit.clone()).map_err(|e| match e {
            ConfigurationError::InvalidRateLimit { key, message } => {
                ConfigurationError::invalid_field(
                    &self.id,
                    "rate_limit",
                    format!("{}: {}", key, message),
                )
            }
            other => other,
        })?;

        let breaker = self
            .circuit_breaker
            .clone()
            .unwrap_or_else(|| default_breaker.clone());
        breaker.validate().map_err(|message| {
            ConfigurationError::invalid_field(&self.id, "circuit_breaker", message)
        })?;

        let mut provider = Provider::new(&self.id, &self.name, &self.category, &self.base_url)
            .with_priority(self.priority)
            .with_weight(self.weight)
            .with_timeout_ms(self.timeout_ms)
            .with_rate_limit(tracker)
            .with_circuit_breaker(breaker);
        provider.endpoints = self.endpoints.clone();
        provider.requires_auth = self.requires_auth;
        provider.auth = self.auth.clone();
        provider.health_endpoint = self.health_endpoint.clone();
        Ok(provider)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |field, message: &str| {
            Err(ConfigurationError::invalid_field(&self.id, field, message))
        };

        if self.id.trim().is_empty() {
            return invalid("id", "must not be empty");
        }
        if self.name.trim().is_empty() {
            return invalid("name", "must not be empty");
        }
        if reqwest::Url::parse(&self.base_url).is_err() {
            return invalid("base_url", "must be an absolute URL");
        }
        if self.weight < 0 {
            return invalid("weight", "must not be negative");
        }
        if self.timeout_ms == 0 {
            return invalid("timeout_ms", "must be greater than zero");
        }
        if let Some(endpoint) = &self.health_endpoint {
            if !self.endpoints.contains_key(endpoint) {
                return invalid("health_endpoint", "must name a configured endpoint");
            }
        }
        if let Some(breaker) = &self.circuit_breaker {
            if let Err(message) = breaker.validate() {
                return invalid("circuit_breaker", &message);
            }
        }

        match &self.auth {
            ProviderAuth::None if self.requires_auth => {
                invalid("auth", "provider requires auth but none is configured")
            }
            ProviderAuth::Header { header_name, key } => {
                if header_name.trim().is_empty() || key.is_empty() {
                    invalid("auth", "header auth needs header_name and key")
                } else {
                    Ok(())
                }
            }
            ProviderAuth::QueryParam { param_name, key } => {
                if param_name.trim().is_empty() || key.is_empty() {
                    invalid("auth", "query auth needs param_name and key")
                } else {
                    Ok(())
                }
            }
            ProviderAuth::None => Ok(()),
        }
    }
}
