mod bot;
mod config;
mod http;
#[cfg(feature = "mqtt")]
mod mqtt;
mod publish;
mod scheduler;

use anyhow::Result;
use std::env;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use publish::Dispatcher;
use scheduler::Fleet;

const DEFAULT_CONFIG_PATH: &str = "config/bot_farm.json";

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path =
        env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::load(&config_path)?;

    // ── Publisher ───────────────────────────────────────────────────
    let dispatcher = Dispatcher::from_config(&cfg.publisher)?;

    // ── Fleet ───────────────────────────────────────────────────────
    let rng = match cfg.seed {
        Some(seed) => {
            info!(seed, "using seeded random source");
            fastrand::Rng::with_seed(seed)
        }
        None => fastrand::Rng::new(),
    };
    let mut fleet = Fleet::from_config(&cfg, dispatcher, rng, Instant::now())?;

    // ── Shutdown ────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("failed to listen for ctrl-c: {e}"),
        }
    });

    fleet.run(shutdown_rx).await;
    info!("bot farm stopped");
    Ok(())
}
