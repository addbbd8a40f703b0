use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;

/// Background task that periodically fires due MarkLate / MarkNoShow events.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let now = engine.now_ms();
        for report in engine.sweep(now).await {
            match report.result {
                Ok(committed) => info!(
                    "swept booking {} on vehicle {}: {} -> {}",
                    report.booking_id, report.vehicle_id, report.event, committed.booking.status
                ),
                // Lost a race with an interactive transition; the next tick re-evaluates.
                Err(e) => debug!("sweep skip {} ({}): {e}", report.booking_id, report.event),
            }
        }
    }
}

/// Background task that checkpoints the engine once the journal has grown
/// past `threshold` appends since the last compaction.
pub async fn run_checkpointer(engine: Arc<Engine>, snapshot_path: PathBuf, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = engine.journal_appends().await;
        if appends < threshold {
            continue;
        }
        match engine.checkpoint(&snapshot_path).await {
            Ok(()) => info!("checkpointed {} after {appends} journal appends", snapshot_path.display()),
            Err(e) => error!("checkpoint {} failed: {e}", snapshot_path.display()),
        }
    }
}
