use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use facegate_core::{CommandExtractor, EuclideanMatcher, IdentityRegistry, IdentityService, StoreFile};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::{IdentityInterface, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        store = %config.store_path.display(),
        threshold = config.match_threshold,
        policy = %config.match_policy,
        extractor = %config.extractor_program.display(),
        "configuration loaded"
    );

    // A corrupt store is fatal: refuse to run on top of an inconsistent population.
    let registry = IdentityRegistry::open(StoreFile::new(&config.store_path))
        .context("opening identity store")?;
    let service = Arc::new(IdentityService::new(
        registry,
        EuclideanMatcher::new(config.match_policy),
        config.match_threshold,
    ));

    let extractor = CommandExtractor::new(&config.extractor_program, config.extractor_args.clone());
    let engine = engine::spawn_engine(extractor, Duration::from_secs(config.extract_timeout_secs))?;

    let iface = IdentityInterface::new(service, engine, config.store_path.clone());
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facegated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
