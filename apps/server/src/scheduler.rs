//! Background scheduler for periodic provider health sweeps.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::main_lib::AppState;

/// Starts the background health sweep.
///
/// The first sweep runs immediately; later sweeps are `every` apart.
pub fn start_health_scheduler(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    info!("Health scheduler started ({}s interval)", every.as_secs());
    let checker = state.health_checker.clone();
    checker.start_background(every, move |online, total| {
        report_sweep(&state, online, total);
    })
}

/// Logs a finished sweep and a per-pool summary.
fn report_sweep(state: &AppState, online: usize, total: usize) -> usize {
    if online < total {
        warn!("Health sweep: {}/{} providers online", online, total);
    } else {
        info!("Health sweep: {}/{} providers online", online, total);
    }

    let limited: Vec<String> = state
        .registry
        .all()
        .iter()
        .map(|handle| handle.name())
        .filter(|name| state.rate_limiter.is_limited(name))
        .collect();
    if !limited.is_empty() {
        debug!("Rate limited providers: {}", limited.join(", "));
    }

    let pools = match state.pool_manager.list_pools() {
        Ok(pools) => pools,
        Err(e) => {
            warn!("Could not list pools after health sweep: {}", e);
            return 0;
        }
    };

    let mut reported = 0;
    for pool in pools {
        match state.pool_manager.get_pool_status(&pool.id) {
            Ok(Some(status)) => {
                info!(
                    "Pool '{}': current={} available={}/{} rotations={}",
                    status.pool.name,
                    status.current_provider_id.as_deref().unwrap_or("none"),
                    status.available_members,
                    status.total_members,
                    status.rotation_count
                );
                reported += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read status of pool '{}': {}", pool.id, e),
        }
    }
    reported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_lib::tests::test_state;

    #[tokio::test]
    async fn test_report_sweep_covers_every_pool() {
        let (_dir, state) = test_state().await;
        assert_eq!(report_sweep(&state, 1, 2), 1);
    }

    #[tokio::test]
    async fn test_scheduler_sweeps_all_providers() {
        let (_dir, state) = test_state().await;
        let sweeps = start_health_scheduler(state.clone(), Duration::from_secs(3600));

        // Nothing listens on the discard port, so the first sweep fails both
        // providers once.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while state.registry.all().iter().any(|h| h.snapshot().stats.failed_requests == 0) {
            assert!(tokio::time::Instant::now() < deadline, "sweep never ran");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sweeps.abort();
    }
}
