pub mod browser;
pub mod collector;
pub mod config;
pub mod db;
pub mod extraction;
pub mod session;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use browser::{ChromeLauncher, LaunchOptions};
use collector::{CollectorController, Supervisor, SupervisorSettings};
use config::CollectorConfig;
use db::Database;
use session::SessionStore;

/// Process entry point: configure, open the store, run the collector until
/// the process is interrupted.
pub fn run() -> Result<()> {
    utils::logging::init();

    info!("roundtap starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("roundtap")
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run_until_interrupted(CollectorConfig::from_env()))
}

async fn run_until_interrupted(cfg: CollectorConfig) -> Result<()> {
    let database = Database::new(cfg.db_path.clone())?;
    info!(
        "{} rounds already stored in {}",
        database.count_rounds().await?,
        database.path().display()
    );

    let Some(settings) = SupervisorSettings::from_config(&cfg) else {
        warn!("ROUNDTAP_TARGET_URL is not set; scraping disabled");
        wait_for_shutdown().await;
        return Ok(());
    };

    if cfg.credentials.is_none() {
        info!("no login credentials configured; collecting unauthenticated");
    }

    let supervisor = Supervisor::new(
        Arc::new(ChromeLauncher::new(LaunchOptions::from_config(&cfg))),
        Arc::new(database.clone()),
        SessionStore::new(cfg.session_path.clone()),
        settings,
    );

    let mut controller = CollectorController::new();
    controller.start(supervisor)?;

    wait_for_shutdown().await;

    info!("shutting down collector");
    controller.stop().await
}

async fn wait_for_shutdown() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}
