//! Health probe domain models.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::HealthCheckError;
use crate::providers::{Provider, ProviderAuth};

/// Everything a probe needs, copied out of the provider so no lock is held
/// while the request is in flight.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub provider_id: String,
    pub name: String,
    pub url: String,
    pub timeout: Duration,
    pub auth: ProviderAuth,
}

impl ProbeTarget {
    pub fn for_provider(provider: &Provider) -> Self {
        Self {
            provider_id: provider.id.clone(),
            name: provider.name.clone(),
            url: provider.probe_url(),
            timeout: Duration::from_millis(provider.timeout_ms),
            auth: provider.auth.clone(),
        }
    }
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy { response_time_ms: f64 },
    /// The upstream answered 429.
    RateLimited,
    Failed(HealthCheckError),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy { .. })
    }
}

/// Per-provider line of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub provider_id: String,
    pub healthy: bool,
    pub response_time_ms: Option<f64>,
    pub error: Option<String>,
}

impl ProbeReport {
    pub fn new(provider_id: impl Into<String>, outcome: &ProbeOutcome) -> Self {
        let provider_id = provider_id.into();
        match outcome {
            ProbeOutcome::Healthy { response_time_ms } => Self {
                provider_id,
                healthy: true,
                response_time_ms: Some(*response_time_ms),
                error: None,
            },
            ProbeOutcome::RateLimited => Self {
                provider_id,
                healthy: false,
                response_time_ms: None,
                error: Some("rate limited (HTTP 429)".to_string()),
            },
            ProbeOutcome::Failed(e) => Self {
                provider_id,
                healthy: false,
                response_time_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}
