use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use frota_sync::{
    config, spawn_drain_on_reconnect, CollectionController, ConnectivityMonitor, Dolly,
    Equipamento, Pendencia, PollingPushChannel, RealtimeRelay, RestRemoteStore, SqliteStore,
    SyncEngine, Tanque, TracingSink,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/frota.db", cfg.app.data_dir));
    let store = Arc::new(SqliteStore::connect(&database_url).await?);

    let remote = Arc::new(RestRemoteStore::new(
        &cfg.remote.base_url,
        cfg.remote.api_key.clone(),
    )?);

    // The agent starts online; platform integrations feed the monitor.
    let monitor = ConnectivityMonitor::new(true);
    let sink = Arc::new(TracingSink);
    let engine = SyncEngine::new(remote.clone(), store, monitor.handle(), sink).await;

    let equipamentos = CollectionController::<Equipamento>::register(engine.clone());
    let tanques = CollectionController::<Tanque>::register(engine.clone());
    let dollys = CollectionController::<Dolly>::register(engine.clone());
    let pendencias = CollectionController::<Pendencia>::register(engine.clone());

    equipamentos.refresh().await;
    tanques.refresh().await;
    dollys.refresh().await;
    pendencias.refresh().await;

    let _drain_task = spawn_drain_on_reconnect(
        monitor.handle(),
        engine.clone(),
        Duration::from_millis(cfg.app.reconnect_debounce_ms),
    );

    let channel = Arc::new(PollingPushChannel::new(
        remote,
        Duration::from_millis(cfg.app.poll_interval_ms),
    ));
    let _relay = RealtimeRelay::spawn(engine.clone(), channel).await?;

    // Replay anything left over from a previous run.
    let report = engine.sync_now().await;
    info!(
        resolved = report.resolved,
        failed = report.failed,
        pending = engine.pending_count().await,
        "startup sync finished"
    );

    info!("frota-sync agent running");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
