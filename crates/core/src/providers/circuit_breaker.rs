//! Consecutive-failure circuit breaker embedded in each provider.
//!
//! The circuit has two states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are blocked until the cooldown
//!   elapses.
//!
//! There is no half-open probe state. An open circuit closes lazily the first
//! time availability is checked after its cooldown, so no background timer is
//! needed.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Default number of consecutive failures before opening the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time an open circuit blocks requests.
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

/// Longest cooldown a configuration may ask for (30 days).
pub const MAX_COOLDOWN_SECS: i64 = 30 * 86_400;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open.
    pub cooldown_secs: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }
}

impl CircuitBreakerConfig {
    /// Rejects settings the breaker cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be at least 1".to_string());
        }
        if !(0..=MAX_COOLDOWN_SECS).contains(&self.cooldown_secs) {
            return Err(format!(
                "cooldown_secs must be between 0 and {}",
                MAX_COOLDOWN_SECS
            ));
        }
        Ok(())
    }

    /// End of a cooldown starting at `now`, saturating at the latest
    /// representable instant.
    fn cooldown_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_seconds(self.cooldown_secs)
            .and_then(|cooldown| now.checked_add_signed(cooldown))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// What a recorded failure did to the circuit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureOutcome {
    /// Still below the threshold.
    Counted,
    /// This failure tripped the circuit.
    Opened,
    /// The circuit was already open.
    AlreadyOpen,
}

/// Circuit breaker for a single provider.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: u32,
    open: bool,
    open_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            open: false,
            open_until: None,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open_until(&self) -> Option<DateTime<Utc>> {
        self.open_until
    }

    pub fn state(&self) -> CircuitState {
        if self.open {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Returns true if requests may pass at `now`.
    ///
    /// An open circuit whose cooldown has elapsed is closed here and its
    /// failure counter reset. `label` is only used for logging.
    pub fn allows_at(&mut self, label: &str, now: DateTime<Utc>) -> bool {
        if !self.open {
            return true;
        }

        match self.open_until {
            Some(until) if now > until => {
                info!(
                    "Circuit breaker: cooldown elapsed for '{}', closing circuit",
                    label
                );
                self.close();
                true
            }
            Some(_) => false,
            None => {
                // Open without a deadline cannot recover on its own.
                self.close();
                true
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                "Circuit breaker: success after {} failures, counter reset",
                self.consecutive_failures
            );
        }
        self.close();
    }

    pub fn record_failure_at(&mut self, label: &str, now: DateTime<Utc>) -> FailureOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.open {
            debug!(
                "Circuit breaker: additional failure for '{}' (already open)",
                label
            );
            return FailureOutcome::AlreadyOpen;
        }

        if self.consecutive_failures >= self.config.failure_threshold {
            let until = self.config.cooldown_end(now);
            info!(
                "Circuit breaker: opening circuit for '{}' after {} failures (until {})",
                label, self.consecutive_failures, until
            );
            self.open = true;
            self.open_until = Some(until);
            FailureOutcome::Opened
        } else {
            debug!(
                "Circuit breaker: failure for '{}' ({}/{})",
                label, self.consecutive_failures, self.config.failure_threshold
            );
            FailureOutcome::Counted
        }
    }

    /// Closes the circuit and clears the failure counter.
    pub fn reset(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.open = false;
        self.open_until = None;
        self.consecutive_failures = 0;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    fn breaker(threshold: u32, cooldown_secs: i64) -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
        })
    }

    #[test]
    fn test_circuit_starts_closed() {
        let mut cb = CircuitBreaker::new();
        assert!(cb.allows_at("test", at(0)));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.config().failure_threshold, DEFAULT_FAILURE_THRESHOLD);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let mut cb = breaker(3, 60);

        assert_eq!(cb.record_failure_at("p", at(0)), FailureOutcome::Counted);
        assert_eq!(cb.record_failure_at("p", at(1)), FailureOutcome::Counted);
        assert!(cb.allows_at("p", at(1)));

        assert_eq!(cb.record_failure_at("p", at(2)), FailureOutcome::Opened);
        assert!(!cb.allows_at("p", at(2)));
        assert_eq!(cb.open_until(), Some(at(62)));
        assert_eq!(
            cb.record_failure_at("p", at(3)),
            FailureOutcome::AlreadyOpen
        );
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut cb = breaker(3, 60);
        cb.record_failure_at("p", at(0));
        cb.record_failure_at("p", at(0));
        assert_eq!(cb.consecutive_failures(), 2);

        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_lazy_close_after_cooldown() {
        let mut cb = breaker(1, 10);
        cb.record_failure_at("p", at(0));

        assert!(!cb.allows_at("p", at(5)));
        assert!(!cb.allows_at("p", at(10)));
        assert!(cb.is_open());

        assert!(cb.allows_at("p", at(11)));
        assert!(!cb.is_open());
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_manual_reset() {
        let mut cb = breaker(1, 60);
        cb.record_failure_at("p", at(0));
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.open_until(), None);
    }

    #[test]
    fn test_config_bounds() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(breaker(0, 60).config().validate().is_err());
        assert!(breaker(1, -1).config().validate().is_err());
        assert!(breaker(1, MAX_COOLDOWN_SECS + 1).config().validate().is_err());
        assert!(breaker(1, MAX_COOLDOWN_SECS).config().validate().is_ok());
    }

    #[test]
    fn test_unbounded_cooldown_saturates() {
        let mut cb = breaker(1, i64::MAX);
        assert_eq!(cb.record_failure_at("p", at(0)), FailureOutcome::Opened);
        assert_eq!(cb.open_until(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(!cb.allows_at("p", at(1_000_000)));
    }
}
