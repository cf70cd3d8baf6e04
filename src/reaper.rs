use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// One settlement pass: every pending or accepted appointment dated before
/// `today` becomes expired or completed. Returns how many were settled.
pub async fn settle_past_appointments(engine: &Engine, today: NaiveDate) -> usize {
    let mut settled = 0;
    for id in engine.collect_unsettled(today) {
        match engine.settle_appointment(id, today).await {
            Ok(Some(appt)) => {
                debug!("settled {id} as {}", appt.status);
                settled += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("settlement skip {id}: {e}"),
        }
    }
    settled
}

/// Background task that settles past-dated appointments every `every`.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = chrono::Utc::now().date_naive();
        let settled = settle_past_appointments(&engine, today).await;
        if settled > 0 {
            info!("settled {settled} past appointments");
        }
    }
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(events) => info!("compacted WAL: {appends} appends folded into {events} events"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
