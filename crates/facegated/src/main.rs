use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod session;

use config::Config;
use dbus_interface::{FaceGateService, BUS_NAME, INTERFACE_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data dir {}", parent.display()))?;
    }

    let kv = facegate_store::SqliteKv::open(&config.db_path)
        .with_context(|| format!("opening gallery db {}", config.db_path.display()))?;
    let store = facegate_store::FaceStore::new(kv);

    let (tick_tx, mut tick_rx) = mpsc::channel::<session::TickEvent>(32);
    let engine = engine::spawn_engine(config, store, tick_tx)?;

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceGateService::new(engine))?
        .build()
        .await
        .context("registering on the session bus")?;

    // Forward per-tick session events as D-Bus signals for overlay
    // renderers.
    let signal_conn = connection.clone();
    tokio::spawn(async move {
        while let Some(event) = tick_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize tick event");
                    continue;
                }
            };
            if let Err(e) = signal_conn
                .emit_signal(
                    Option::<&str>::None,
                    OBJECT_PATH,
                    INTERFACE_NAME,
                    "CollectionTick",
                    &(payload,),
                )
                .await
            {
                tracing::warn!(error = %e, "failed to emit CollectionTick");
            }
        }
    });

    tracing::info!("facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
