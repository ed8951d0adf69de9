//! Provider entity: identity, selection policy, and runtime health state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureOutcome};
use super::rate_limit::{RateLimitSnapshot, RateLimitTracker};

/// Default per-request timeout for a provider.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Smoothing factor for the response time moving average.
const RESPONSE_TIME_ALPHA: f64 = 0.2;

/// Health status of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    #[default]
    Online,
    Degraded,
    Offline,
    RateLimited,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Online => "ONLINE",
            ProviderStatus::Degraded => "DEGRADED",
            ProviderStatus::Offline => "OFFLINE",
            ProviderStatus::RateLimited => "RATE_LIMITED",
        }
    }

    /// Statuses that allow a provider to be selected.
    pub fn is_selectable(&self) -> bool {
        matches!(self, ProviderStatus::Online | ProviderStatus::Degraded)
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a provider cannot currently be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Unavailability {
    CircuitOpen,
    RateLimited,
    Offline,
}

/// How a provider authenticates its requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderAuth {
    #[default]
    None,
    Header { header_name: String, key: String },
    QueryParam { param_name: String, key: String },
}

impl std::fmt::Debug for ProviderAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Header { header_name, .. } => f
                .debug_struct("Header")
                .field("header_name", header_name)
                .field("key", &"***")
                .finish(),
            Self::QueryParam { param_name, .. } => f
                .debug_struct("QueryParam")
                .field("param_name", param_name)
                .field("key", &"***")
                .finish(),
        }
    }
}

/// Runtime request statistics for a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Exponential moving average in milliseconds; `None` until measured.
    pub avg_response_time: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub status: ProviderStatus,
}

impl ProviderStats {
    /// Success percentage, 0 when nothing has been recorded yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}

/// Serializable view of a provider for status consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    pub id: String,
    pub name: String,
    pub category: String,
    pub priority: i32,
    pub weight: i32,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub rate_limit: RateLimitSnapshot,
    pub stats: ProviderStats,
}

/// One upstream API endpoint.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub category: String,
    pub base_url: String,
    pub endpoints: BTreeMap<String, String>,
    /// Higher values are preferred by the priority strategy.
    pub priority: i32,
    pub weight: i32,
    pub requires_auth: bool,
    pub auth: ProviderAuth,
    pub timeout_ms: u64,
    /// Name of the endpoint health checks should hit.
    pub health_endpoint: Option<String>,
    rate_limit: RateLimitTracker,
    circuit: CircuitBreaker,
    stats: ProviderStats,
}

impl Provider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            base_url: base_url.into(),
            endpoints: BTreeMap::new(),
            priority: 0,
            weight: 1,
            requires_auth: false,
            auth: ProviderAuth::None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            health_endpoint: None,
            rate_limit: RateLimitTracker::unlimited(),
            circuit: CircuitBreaker::new(),
            stats: ProviderStats::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_endpoint(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.endpoints.insert(name.into(), path.into());
        self
    }

    pub fn with_auth(mut self, auth: ProviderAuth) -> Self {
        self.requires_auth = !matches!(auth, ProviderAuth::None);
        self.auth = auth;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_rate_limit(mut self, tracker: RateLimitTracker) -> Self {
        self.rate_limit = tracker;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit = CircuitBreaker::with_config(config);
        self
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    pub fn status(&self) -> ProviderStatus {
        self.stats.status
    }

    pub fn total_requests(&self) -> u64 {
        self.stats.total_requests
    }

    pub fn avg_response_time(&self) -> Option<f64> {
        self.stats.avg_response_time
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.circuit.consecutive_failures()
    }

    pub fn circuit_open_until(&self) -> Option<DateTime<Utc>> {
        self.circuit.open_until()
    }

    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    pub fn is_available(&mut self) -> bool {
        self.is_available_at(Utc::now())
    }

    /// True iff the circuit is closed (or its cooldown just elapsed), the
    /// rate limiter has headroom, and the status is ONLINE or DEGRADED.
    pub fn is_available_at(&mut self, now: DateTime<Utc>) -> bool {
        self.unavailability_at(now).is_none()
    }

    /// The first reason this provider cannot be selected, if any.
    pub fn unavailability_at(&mut self, now: DateTime<Utc>) -> Option<Unavailability> {
        let was_open = self.circuit.is_open();
        if !self.circuit.allows_at(&self.id, now) {
            return Some(Unavailability::CircuitOpen);
        }
        if was_open && self.stats.status == ProviderStatus::Offline {
            // Cooldown elapsed; eligible again without an intervening success.
            self.stats.status = ProviderStatus::Degraded;
        }

        if self.rate_limit.is_limited_at(now) {
            return Some(Unavailability::RateLimited);
        }

        match self.stats.status {
            ProviderStatus::Online | ProviderStatus::Degraded => None,
            ProviderStatus::RateLimited => Some(Unavailability::RateLimited),
            ProviderStatus::Offline => Some(Unavailability::Offline),
        }
    }

    /// Counts an attempted use against the rate limit windows.
    pub fn record_use(&mut self) {
        self.record_use_at(Utc::now());
    }

    pub fn record_use_at(&mut self, now: DateTime<Utc>) {
        self.rate_limit.increment_at(now);
    }

    pub fn record_success(&mut self, response_time_ms: f64) {
        self.record_success_at(response_time_ms, Utc::now());
    }

    pub fn record_success_at(&mut self, response_time_ms: f64, now: DateTime<Utc>) {
        self.stats.total_requests += 1;
        self.stats.successful_requests += 1;
        self.stats.last_check = Some(now);
        self.stats.avg_response_time = Some(match self.stats.avg_response_time {
            Some(avg) if avg > 0.0 => {
                RESPONSE_TIME_ALPHA * response_time_ms + (1.0 - RESPONSE_TIME_ALPHA) * avg
            }
            _ => response_time_ms,
        });
        self.circuit.record_success();
        self.stats.status = ProviderStatus::Online;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.record_failure_at(error, Utc::now());
    }

    pub fn record_failure_at(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        let error = error.into();
        self.stats.total_requests += 1;
        self.stats.failed_requests += 1;
        self.stats.last_check = Some(now);

        match self.circuit.record_failure_at(&self.id, now) {
            FailureOutcome::Opened => {
                warn!(
                    "Provider '{}' marked OFFLINE after {} consecutive failures: {}",
                    self.id,
                    self.circuit.consecutive_failures(),
                    error
                );
                self.stats.status = ProviderStatus::Offline;
            }
            FailureOutcome::AlreadyOpen => {
                self.stats.status = ProviderStatus::Offline;
            }
            FailureOutcome::Counted => {
                debug!("Provider '{}' degraded: {}", self.id, error);
                self.stats.status = ProviderStatus::Degraded;
            }
        }
        self.stats.last_error = Some(error);
    }

    /// The upstream refused the request for quota reasons.
    ///
    /// Counted as a failed request but not against the circuit breaker.
    pub fn record_rate_limited(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.stats.total_requests += 1;
        self.stats.failed_requests += 1;
        self.stats.last_check = Some(now);
        self.stats.last_error = Some(message.into());
        self.stats.status = ProviderStatus::RateLimited;
    }

    /// Administrative status override.
    pub fn set_status(&mut self, status: ProviderStatus) {
        self.stats.status = status;
    }

    pub fn reset_circuit(&mut self) {
        self.circuit.reset();
        if self.stats.status == ProviderStatus::Offline {
            self.stats.status = ProviderStatus::Degraded;
        }
    }

    /// The URL a health check should request.
    ///
    /// Uses the named `health_endpoint` when present, otherwise the first
    /// endpoint by name, otherwise the base URL itself.
    pub fn probe_url(&self) -> String {
        let path = self
            .health_endpoint
            .as_ref()
            .and_then(|name| self.endpoints.get(name))
            .or_else(|| self.endpoints.values().next());

        match path {
            Some(path) => join_url(&self.base_url, path),
            None => self.base_url.clone(),
        }
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            priority: self.priority,
            weight: self.weight,
            circuit_state: self.circuit.state(),
            consecutive_failures: self.circuit.consecutive_failures(),
            circuit_open_until: self.circuit.open_until(),
            rate_limit: self.rate_limit.snapshot(),
            stats: self.stats.clone(),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
