use std::sync::Arc;

use anyhow::{Context, Result};
use rollcall_core::FsIdentityStore;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        store_dir = %config.store_dir.display(),
        model_dir = %config.model_dir.display(),
        threshold = config.match_threshold,
        bus = ?config.bus,
        "configuration loaded"
    );

    let store = Arc::new(
        FsIdentityStore::open(&config.store_dir)
            .with_context(|| format!("opening identity store at {}", config.store_dir.display()))?,
    );
    let engine = engine::spawn_engine(&config, Arc::clone(&store)).context("starting engine")?;
    let service = RollcallService::new(engine, store, &config);

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
