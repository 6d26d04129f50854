use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::{Ms, ReservationStatus};
use crate::observability;

/// One pass of the clock-driven lifecycle: expire overdue pending
/// reservations, start and complete confirmed ones. Returns how many
/// reservations changed state.
///
/// Safe to run concurrently with bookings: each transition is re-checked
/// under the facility lock, so a reservation confirmed or cancelled since
/// collection is left alone.
pub async fn sweep(engine: &Engine, now: Ms) -> usize {
    let mut changed = 0;
    for id in engine.collect_due_transitions(now) {
        match engine.apply_due_transition(id, now).await {
            Ok(Some(status)) => {
                changed += 1;
                metrics::counter!(observability::LIFECYCLE_TRANSITIONS_TOTAL, "to" => status.as_str())
                    .increment(1);
                if status == ReservationStatus::Expired {
                    info!("expired unpaid reservation {id}");
                } else {
                    info!("reservation {id} is now {status}");
                }
            }
            Ok(None) => {}
            Err(EngineError::Concurrency(fid)) => {
                debug!("sweep skip {id}: facility {fid} busy, retrying next tick");
            }
            Err(e) => warn!("sweep failed for {id}: {e}"),
        }
    }
    changed
}

/// Background task that runs `sweep` every `every`.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep(&engine, crate::engine::now_ms()).await;
    }
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
