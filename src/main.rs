use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use seatflow::config::EngineConfig;
use seatflow::engine::Engine;
use seatflow::notify::{spawn_dispatcher, LogNotifier, NotifyHub};
use seatflow::reaper;
use seatflow::store::LedgerStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("SEATFLOW_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    seatflow::observability::init(metrics_port)?;

    let data_dir = std::env::var("SEATFLOW_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let sweep_secs: u64 = std::env::var("SEATFLOW_SWEEP_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|s| *s > 0)
        .unwrap_or(5);
    let compact_threshold: u64 = std::env::var("SEATFLOW_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let config = EngineConfig::from_env();

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("reservations.wal");
    let store = Arc::new(LedgerStore::open(wal_path)?);

    let notify = Arc::new(NotifyHub::new());
    let dispatcher = spawn_dispatcher(&notify, Arc::new(LogNotifier));

    info!("seatflow starting");
    info!("  data_dir: {data_dir}");
    info!("  console slots: {}", config.console_capacity);
    info!("  restricted game: {}", config.restricted_game);
    info!("  aging after: {} min", config.aging_threshold_ms / 60_000);
    info!("  session: {} min", config.session_ms / 60_000);
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let engine = Arc::new(Engine::new(config, store.clone(), notify));

    // Anything left waiting from before a restart gets a chance immediately.
    match engine.run_cycle().await {
        Ok(report) => info!(activations = report.activations(), "startup cycle done"),
        Err(e) => tracing::error!("startup cycle failed: {e}"),
    }

    let reaper_task = tokio::spawn(reaper::run_reaper(engine.clone(), Duration::from_secs(sweep_secs)));
    let compactor_task = tokio::spawn(reaper::run_compactor(store.clone(), compact_threshold));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;
    info!("shutdown signal received");

    reaper_task.abort();
    compactor_task.abort();
    // Let an in-flight cycle finish before compacting.
    let _ = engine.run_cycle().await;
    if let Err(e) = store.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    dispatcher.abort();

    info!("seatflow stopped");
    Ok(())
}
