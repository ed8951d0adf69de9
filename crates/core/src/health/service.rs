//! Health checker implementation.
//!
//! Probes providers concurrently and feeds each outcome back into the
//! provider's stats. Failures are data: nothing here returns an error.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use super::http::HttpProbe;
use super::model::{ProbeOutcome, ProbeReport, ProbeTarget};
use super::traits::HealthProbe;
use crate::providers::{ProviderHandle, ProviderRegistry};

/// Runs health probes against registered providers.
pub struct HealthChecker {
    registry: Arc<ProviderRegistry>,
    probe: Arc<dyn HealthProbe>,
}

impl HealthChecker {
    pub fn new(registry: Arc<ProviderRegistry>, probe: Arc<dyn HealthProbe>) -> Self {
        Self { registry, probe }
    }

    /// Checker backed by [`HttpProbe`] with the given client timeout.
    pub fn with_http(registry: Arc<ProviderRegistry>, client_timeout: Duration) -> Self {
        Self::new(registry, Arc::new(HttpProbe::with_timeout(client_timeout)))
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Probes one provider and records the result. Returns `true` if healthy.
    ///
    /// The probe runs on its own task, so dropping this future does not stop
    /// the result from being recorded.
    pub async fn health_check(&self, provider: &ProviderHandle) -> bool {
        let report = self.spawn_probe(provider.clone(), false).await;
        report.healthy
    }

    /// Probes every registered provider concurrently.
    ///
    /// Returns `(online, total)`. In silent mode individual results are only
    /// logged at debug level.
    pub async fn health_check_all(&self, silent: bool) -> (usize, usize) {
        let reports = self.check_all_reports(silent).await;
        let total = reports.len();
        let online = reports.iter().filter(|r| r.healthy).count();

        if silent {
            debug!("Health sweep: {}/{} providers online", online, total);
        } else {
            info!("Health check complete: {}/{} providers online", online, total);
        }
        (online, total)
    }

    /// Like [`health_check_all`](Self::health_check_all) but returns the
    /// per-provider reports.
    pub async fn check_all_reports(&self, silent: bool) -> Vec<ProbeReport> {
        let providers = self.registry.all();
        let tasks = providers
            .into_iter()
            .map(|handle| self.spawn_probe(handle, silent));
        join_all(tasks).await
    }

    /// Runs a silent sweep every `interval` until the handle is aborted,
    /// handing each sweep's `(online, total)` to `on_sweep`.
    ///
    /// The first sweep starts immediately.
    pub fn start_background<F>(
        self: Arc<Self>,
        interval: Duration,
        mut on_sweep: F,
    ) -> JoinHandle<()>
    where
        F: FnMut(usize, usize) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let (online, total) = self.health_check_all(true).await;
                on_sweep(online, total);
            }
        })
    }

    async fn spawn_probe(&self, handle: ProviderHandle, silent: bool) -> ProbeReport {
        let target = ProbeTarget::for_provider(&handle.lock());
        let provider_id = target.provider_id.clone();
        let probe = self.probe.clone();

        let task = tokio::spawn(async move {
            let outcome = probe.probe(&target).await;
            apply_outcome(&handle, &target, &outcome, silent);
            ProbeReport::new(target.provider_id.clone(), &outcome)
        });

        match task.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Health probe task for '{}' failed: {}", provider_id, e);
                ProbeReport {
                    provider_id,
                    healthy: false,
                    response_time_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn apply_outcome(handle: &ProviderHandle, target: &ProbeTarget, outcome: &ProbeOutcome, silent: bool) {
    match outcome {
        ProbeOutcome::Healthy { response_time_ms } => {
            handle.record_success(*response_time_ms);
            if silent {
                debug!("{} healthy ({:.0}ms)", target.name, response_time_ms);
            } else {
                info!("{} healthy ({:.0}ms)", target.name, response_time_ms);
            }
        }
        ProbeOutcome::RateLimited => {
            handle.with(|p| p.record_rate_limited("rate limited (HTTP 429)"));
            if silent {
                debug!("{} rate limited", target.name);
            } else {
                warn!("{} rate limited", target.name);
            }
        }
        ProbeOutcome::Failed(error) => {
            handle.record_failure(error.to_string());
            if silent {
                debug!("{} unhealthy ({}): {}", target.name, error.kind(), error);
            } else {
                warn!("{} unhealthy ({}): {}", target.name, error.kind(), error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthCheckError;
    use crate::providers::{Provider, ProviderStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Probe returning a fixed outcome per provider id.
    struct ScriptedProbe {
        outcomes: HashMap<String, ProbeOutcome>,
        delay: Duration,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
            tokio::time::sleep(self.delay).await;
            self.outcomes
                .get(&target.provider_id)
                .cloned()
                .unwrap_or(ProbeOutcome::Failed(HealthCheckError::Transport(
                    "unscripted".to_string(),
                )))
        }
    }

    fn registry(ids: &[&str]) -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        for id in ids {
            registry
                .insert(Provider::new(*id, *id, "market_data", "https://example.com"))
                .unwrap();
        }
        Arc::new(registry)
    }

    fn checker(registry: Arc<ProviderRegistry>, outcomes: &[(&str, ProbeOutcome)]) -> HealthChecker {
        let probe = ScriptedProbe {
            outcomes: outcomes
                .iter()
                .map(|(id, o)| (id.to_string(), o.clone()))
                .collect(),
            delay: Duration::from_millis(5),
        };
        HealthChecker::new(registry, Arc::new(probe))
    }

    #[tokio::test]
    async fn test_health_check_records_success() {
        let registry = registry(&["a"]);
        let checker = checker(
            registry.clone(),
            &[("a", ProbeOutcome::Healthy { response_time_ms: 42.0 })],
        );

        let handle = registry.get("a").unwrap();
        assert!(checker.health_check(&handle).await);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.stats.successful_requests, 1);
        assert_eq!(snapshot.stats.avg_response_time, Some(42.0));
        assert_eq!(snapshot.stats.status, ProviderStatus::Online);
    }

    #[tokio::test]
    async fn test_health_check_all_counts_and_records() {
        let registry = registry(&["up", "down", "slow", "limited"]);
        let checker = checker(
            registry.clone(),
            &[
                ("up", ProbeOutcome::Healthy { response_time_ms: 10.0 }),
                (
                    "down",
                    ProbeOutcome::Failed(HealthCheckError::Status { status: 503 }),
                ),
                (
                    "slow",
                    ProbeOutcome::Failed(HealthCheckError::Timeout { timeout_ms: 10_000 }),
                ),
                ("limited", ProbeOutcome::RateLimited),
            ],
        );

        let (online, total) = checker.health_check_all(true).await;
        assert_eq!((online, total), (1, 4));

        let down = registry.get("down").unwrap().snapshot();
        assert_eq!(down.stats.failed_requests, 1);
        assert_eq!(down.stats.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(down.consecutive_failures, 1);

        let slow = registry.get("slow").unwrap().snapshot();
        assert!(slow.stats.last_error.unwrap().contains("timeout"));

        let limited = registry.get("limited").unwrap().snapshot();
        assert_eq!(limited.stats.status, ProviderStatus::RateLimited);
        assert_eq!(limited.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_open_circuit() {
        let registry = registry(&["flaky"]);
        let checker = checker(
            registry.clone(),
            &[(
                "flaky",
                ProbeOutcome::Failed(HealthCheckError::Transport("refused".to_string())),
            )],
        );

        for _ in 0..5 {
            checker.health_check_all(true).await;
        }
        let handle = registry.get("flaky").unwrap();
        assert!(!handle.is_available());
        assert_eq!(handle.status(), ProviderStatus::Offline);
    }

    #[tokio::test]
    async fn test_abandoned_check_still_records() {
        let registry = registry(&["a"]);
        let probe = ScriptedProbe {
            outcomes: [("a".to_string(), ProbeOutcome::Healthy { response_time_ms: 5.0 })]
                .into_iter()
                .collect(),
            delay: Duration::from_millis(100),
        };
        let checker = HealthChecker::new(registry.clone(), Arc::new(probe));
        let handle = registry.get("a").unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), checker.health_check(&handle)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handle.snapshot().stats.successful_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeps_every_interval() {
        let registry = registry(&["a"]);
        let checker = Arc::new(checker(
            registry.clone(),
            &[("a", ProbeOutcome::Healthy { response_time_ms: 3.0 })],
        ));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let started = tokio::time::Instant::now();

        let sweeps = checker.start_background(Duration::from_secs(60), move |online, total| {
            let _ = tx.send((online, total));
        });
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some((1, 1)));
        }
        sweeps.abort();

        assert!(started.elapsed() >= Duration::from_secs(120));
        assert_eq!(
            registry.get("a").unwrap().snapshot().stats.successful_requests,
            3
        );
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let checker = checker(Arc::new(ProviderRegistry::new()), &[]);
        assert_eq!(checker.health_check_all(false).await, (0, 0));
    }
}
