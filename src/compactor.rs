use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

/// How often the compactor checks the journal's growth.
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the WAL once more than `threshold` records
/// were appended since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// One compactor tick. Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    debug!(appends, threshold, "compacting WAL");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            // Retried on the next tick; the old journal is still intact.
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
