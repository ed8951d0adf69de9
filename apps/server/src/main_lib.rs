use std::sync::Arc;

use sourcepool_core::{
    health::HealthChecker, pools::SourcePoolManager, providers::ProviderRegistry, RateLimiter,
    SourcesConfig,
};
use sourcepool_storage_sqlite::{db, SourcePoolRepository};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub health_checker: Arc<HealthChecker>,
    pub pool_manager: Arc<SourcePoolManager>,
}

pub fn init_tracing() {
    let log_format = std::env::var("SP_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let sources = SourcesConfig::load(&config.sources_file)?;
    let registry = Arc::new(sources.build_registry()?);
    let rate_limiter = Arc::new(RateLimiter::from_registry(&registry));

    let db_path = db::init(&config.db_path)?;
    tracing::info!("Database path in use: {}", db_path);
    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;
    let writer = db::spawn_writer((*pool).clone());

    let pool_repository = Arc::new(SourcePoolRepository::new(pool.clone(), writer.clone()));
    let pool_manager = Arc::new(SourcePoolManager::new(
        pool_repository,
        registry.clone(),
        rate_limiter.clone(),
    ));
    let seeded = pool_manager.seed_pools(&sources.pools).await?;
    tracing::info!(
        "{} providers registered, {} pools configured ({} new)",
        registry.len(),
        sources.pools.len(),
        seeded
    );

    let health_checker = Arc::new(HealthChecker::with_http(
        registry.clone(),
        config.http_timeout,
    ));

    Ok(Arc::new(AppState {
        registry,
        rate_limiter,
        health_checker,
        pool_manager,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    const SOURCES: &str = r#"{
        "providers": [
            { "id": "a", "name": "Alpha", "category": "market_data", "base_url": "http://127.0.0.1:9", "priority": 2,
              "rate_limit": { "requests_per_minute": 10 } },
            { "id": "b", "name": "Beta", "category": "market_data", "base_url": "http://127.0.0.1:9", "priority": 1 }
        ],
        "pools": [
            {
                "id": "prices",
                "name": "Prices",
                "category": "market_data",
                "rotation_strategy": "priority",
                "members": [ { "provider_id": "a", "priority": 2 }, { "provider_id": "b", "priority": 1 } ]
            }
        ]
    }"#;

    /// State built from the two-provider sources file in a fresh directory.
    pub(crate) async fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let sources_file = dir.path().join("sources.json");
        std::fs::write(&sources_file, SOURCES).unwrap();

        let config = Config {
            db_path: dir.path().join("db").join("test.db").to_string_lossy().to_string(),
            sources_file: sources_file.to_string_lossy().to_string(),
            health_interval: Duration::from_secs(60),
            http_timeout: Duration::from_secs(1),
        };
        let state = build_state(&config).await.unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn test_build_state_wires_services() {
        let (_dir, state) = test_state().await;

        assert_eq!(state.registry.len(), 2);
        assert_eq!(state.pool_manager.list_pools().unwrap().len(), 1);
        let next = state
            .pool_manager
            .get_next_provider("prices", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id(), "a");
        assert_eq!(state.rate_limiter.snapshot("Alpha").map(|s| s.current_usage), Some(1));
    }
}
