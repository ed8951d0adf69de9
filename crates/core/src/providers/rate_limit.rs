//! Multi-window request counter for a single provider.
//!
//! Every configured ceiling owns a fixed window. A window opens on the first
//! request after it was last reset and closes `span` later; the tracker is
//! limited while any open window has reached its ceiling.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

/// Longest window a ceiling may span.
pub const MAX_WINDOW_DAYS: i64 = 3_650;

/// Per-window request ceilings for a provider.
///
/// Unset ceilings are ignored. `extra_limits` carries additional windows keyed
/// by a compact span such as `"15m"`, `"6h"` or `"2d"` (units `s`, `m`, `h`,
/// `d`, `w`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub requests_per_day: Option<u32>,
    pub requests_per_week: Option<u32>,
    pub requests_per_month: Option<u32>,
    pub extra_limits: BTreeMap<String, u32>,
}

impl RateLimitConfig {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            requests_per_minute: Some(limit),
            ..Default::default()
        }
    }

    /// Resolves every configured ceiling into a window, validating as it goes.
    fn windows(&self) -> Result<Vec<Window>, ConfigurationError> {
        let named = [
            ("second", Duration::seconds(1), self.requests_per_second),
            ("minute", Duration::minutes(1), self.requests_per_minute),
            ("hour", Duration::hours(1), self.requests_per_hour),
            ("day", Duration::days(1), self.requests_per_day),
            ("week", Duration::weeks(1), self.requests_per_week),
            ("month", Duration::days(30), self.requests_per_month),
        ];

        let mut windows = Vec::new();
        for (label, span, limit) in named {
            if let Some(limit) = limit {
                windows.push(Window::new(label.to_string(), span, limit)?);
            }
        }

        for (key, limit) in &self.extra_limits {
            let span = parse_span(key).ok_or_else(|| ConfigurationError::InvalidRateLimit {
                key: key.clone(),
                message: "expected a window like '15m', '6h' or '2d'".to_string(),
            })?;
            if span > Duration::days(MAX_WINDOW_DAYS) {
                return Err(ConfigurationError::InvalidRateLimit {
                    key: key.clone(),
                    message: format!("window must not exceed {} days", MAX_WINDOW_DAYS),
                });
            }
            windows.push(Window::new(key.clone(), span, *limit)?);
        }

        windows.sort_by_key(|w| w.span);
        Ok(windows)
    }
}

/// Parses a compact window span (`"90s"`, `"15m"`, `"6h"`, `"2d"`, `"1w"`).
fn parse_span(key: &str) -> Option<Duration> {
    let key = key.trim();
    let unit = key.chars().last()?;
    let amount: i64 = key[..key.len() - unit.len_utf8()].parse().ok()?;
    if amount <= 0 {
        return None;
    }
    match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        'w' => Duration::try_weeks(amount),
        _ => None,
    }
}

#[derive(Clone, Debug)]
struct Window {
    label: String,
    span: Duration,
    limit: u32,
    count: u32,
    started_at: Option<DateTime<Utc>>,
}

impl Window {
    fn new(label: String, span: Duration, limit: u32) -> Result<Self, ConfigurationError> {
        if limit == 0 {
            return Err(ConfigurationError::InvalidRateLimit {
                key: label,
                message: "ceiling must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            label,
            span,
            limit,
            count: 0,
            started_at: None,
        })
    }

    fn resets_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .and_then(|start| start.checked_add_signed(self.span))
    }

    fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.resets_at().is_some_and(|reset| now < reset)
    }

    /// Count inside the current window, zero once it has elapsed.
    fn used(&self, now: DateTime<Utc>) -> u32 {
        if self.is_open(now) {
            self.count
        } else {
            0
        }
    }

    fn is_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.used(now) >= self.limit
    }

    fn record(&mut self, now: DateTime<Utc>) {
        if !self.is_open(now) {
            self.count = 0;
            self.started_at = Some(now);
        }
        self.count = self.count.saturating_add(1);
    }
}

/// Usage of one window, as reported in status snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowUsage {
    pub window: String,
    pub limit: u32,
    pub used: u32,
    pub resets_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of a tracker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub limited: bool,
    pub current_usage: u32,
    pub reset_time: Option<DateTime<Utc>>,
    pub windows: Vec<WindowUsage>,
}

/// Fixed-window usage counter with any number of simultaneous ceilings.
#[derive(Clone, Debug)]
pub struct RateLimitTracker {
    config: RateLimitConfig,
    windows: Vec<Window>,
}

impl RateLimitTracker {
    /// Builds a tracker, rejecting zero ceilings and unparseable extra windows.
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigurationError> {
        let windows = config.windows()?;
        Ok(Self { config, windows })
    }

    /// A tracker with no ceilings; never limited.
    pub fn unlimited() -> Self {
        Self {
            config: RateLimitConfig::default(),
            windows: Vec::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn increment(&mut self) {
        self.increment_at(Utc::now());
    }

    pub fn increment_at(&mut self, now: DateTime<Utc>) {
        for window in &mut self.windows {
            window.record(now);
        }
    }

    pub fn is_limited(&self) -> bool {
        self.is_limited_at(Utc::now())
    }

    pub fn is_limited_at(&self, now: DateTime<Utc>) -> bool {
        self.windows.iter().any(|w| w.is_exhausted(now))
    }

    pub fn current_usage(&self) -> u32 {
        self.current_usage_at(Utc::now())
    }

    /// Requests counted in the shortest configured window.
    pub fn current_usage_at(&self, now: DateTime<Utc>) -> u32 {
        self.windows.first().map(|w| w.used(now)).unwrap_or(0)
    }

    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.reset_time_at(Utc::now())
    }

    /// When the tracker next frees up.
    ///
    /// While limited this is the earliest reset among the exhausted windows;
    /// otherwise the earliest reset among the open ones.
    pub fn reset_time_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let blocking = self
            .windows
            .iter()
            .filter(|w| w.is_exhausted(now))
            .filter_map(Window::resets_at)
            .min();

        blocking.or_else(|| {
            self.windows
                .iter()
                .filter(|w| w.is_open(now))
                .filter_map(Window::resets_at)
                .min()
        })
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> RateLimitSnapshot {
        RateLimitSnapshot {
            limited: self.is_limited_at(now),
            current_usage: self.current_usage_at(now),
            reset_time: self.reset_time_at(now),
            windows: self
                .windows
                .iter()
                .map(|w| WindowUsage {
                    window: w.label.clone(),
                    limit: w.limit,
                    used: w.used(now),
                    resets_at: if w.is_open(now) { w.resets_at() } else { None },
                })
                .collect(),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_limited_after_ceiling_then_resets() {
        let mut tracker = RateLimitTracker::new(RateLimitConfig::per_minute(5)).unwrap();

        for i in 0..5 {
            assert!(!tracker.is_limited_at(at(i)));
            tracker.increment_at(at(i));
        }
        assert!(tracker.is_limited_at(at(5)));

        let reset = tracker.reset_time_at(at(5)).unwrap();
        assert_eq!(reset, at(60));
        assert!(tracker.is_limited_at(at(59)));
        assert!(!tracker.is_limited_at(reset));
    }

    #[test]
    fn test_any_window_limits() {
        let config = RateLimitConfig {
            requests_per_minute: Some(100),
            requests_per_day: Some(3),
            ..Default::default()
        };
        let mut tracker = RateLimitTracker::new(config).unwrap();

        tracker.increment_at(at(0));
        tracker.increment_at(at(120));
        tracker.increment_at(at(240));

        // Minute window is nearly empty, but the daily ceiling is hit.
        assert_eq!(tracker.current_usage_at(at(241)), 1);
        assert!(tracker.is_limited_at(at(241)));
        assert_eq!(tracker.reset_time_at(at(241)), Some(at(86_400)));
    }

    #[test]
    fn test_unset_ceilings_ignored() {
        let mut tracker = RateLimitTracker::unlimited();
        for i in 0..10_000 {
            tracker.increment_at(at(i % 10));
        }
        assert!(!tracker.is_limited_at(at(10)));
        assert_eq!(tracker.reset_time_at(at(10)), None);
    }

    #[test]
    fn test_extra_limits_parsed() {
        let mut config = RateLimitConfig::default();
        config.extra_limits.insert("15m".to_string(), 2);
        let mut tracker = RateLimitTracker::new(config).unwrap();

        tracker.increment_at(at(0));
        tracker.increment_at(at(1));
        assert!(tracker.is_limited_at(at(2)));
        assert!(!tracker.is_limited_at(at(15 * 60)));

        let snapshot = tracker.snapshot_at(at(2));
        assert_eq!(snapshot.windows.len(), 1);
        assert_eq!(snapshot.windows[0].window, "15m");
        assert_eq!(snapshot.windows[0].used, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RateLimitConfig::default();
        config.extra_limits.insert("fortnight".to_string(), 2);
        assert!(matches!(
            RateLimitTracker::new(config),
            Err(ConfigurationError::InvalidRateLimit { .. })
        ));

        let config = RateLimitConfig {
            requests_per_hour: Some(0),
            ..Default::default()
        };
        assert!(RateLimitTracker::new(config).is_err());
    }

    #[test]
    fn test_oversized_window_rejected() {
        for key in ["1000000000w", "99999999999999999d", "3651d"] {
            let mut config = RateLimitConfig::default();
            config.extra_limits.insert(key.to_string(), 5);
            assert!(
                matches!(
                    RateLimitTracker::new(config),
                    Err(ConfigurationError::InvalidRateLimit { .. })
                ),
                "{} accepted",
                key
            );
        }

        let mut config = RateLimitConfig::default();
        config.extra_limits.insert("3650d".to_string(), 1);
        let mut tracker = RateLimitTracker::new(config).unwrap();
        tracker.increment();
        assert!(tracker.is_limited());
        assert!(tracker.reset_time().is_some());
    }

    #[test]
    fn test_parse_span() {
        assert_eq!(parse_span("90s"), Some(Duration::seconds(90)));
        assert_eq!(parse_span("2w"), Some(Duration::weeks(2)));
        assert_eq!(parse_span("0m"), None);
        assert_eq!(parse_span("m"), None);
        assert_eq!(parse_span("5y"), None);
        assert_eq!(parse_span("9223372036854775807s"), None);
    }
}
