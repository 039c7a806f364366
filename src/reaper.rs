use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine};
use crate::store::LedgerStore;

/// Background task that periodically reclaims expired reservations and
/// re-runs allocation for whatever they freed.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep_expired(now_ms()).await {
            Ok(0) => {}
            Ok(n) => debug!("sweep reclaimed {n} reservations"),
            // Next tick retries; nothing was half-applied.
            Err(e) => warn!("expiration sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the ledger once enough appends pile up.
pub async fn run_compactor(store: Arc<LedgerStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted ledger after {appends} appends"),
            Err(e) => warn!("ledger compaction failed: {e}"),
        }
    }
}
