mod config;
mod main_lib;
mod scheduler;

use config::Config;
use main_lib::{build_state, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing();
    let state = build_state(&config).await?;

    let sweeps = scheduler::start_health_scheduler(state.clone(), config.health_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    sweeps.abort();
    Ok(())
}
