mod config;
mod data;
mod error;
mod extract;
mod jobs;
mod model;
mod normalize;
mod server;
mod solver;
mod store;

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

use crate::config::Config;
use crate::jobs::JobManager;
use crate::solver::HighsEngine;
use crate::store::{FileStore, MemoryStore, ResultStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    info!("Loaded configuration: {:?}", config);

    let store: Arc<dyn ResultStore> = if config.ephemeral_results {
        warn!("Results are kept in memory and will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        let store = FileStore::open(&config.results_dir).with_context(|| {
            format!("Failed to open results directory {}", config.results_dir.display())
        })?;
        Arc::new(store)
    };
    let jobs = JobManager::new(
        Arc::new(HighsEngine::default()),
        store,
        config.solve_settings(),
        config.max_concurrent_jobs,
    );
    jobs.spawn_janitor(config.result_retention, config.janitor_interval);

    server::run_server(&config, jobs).await
}
