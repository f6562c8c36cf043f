//! Background cleanup of abandoned sessions

use std::time::Duration;

use tokio::task::JoinHandle;

use super::session::UploadService;

/// How often the sweeper wakes up
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Spawn the sweeper. Returns `None` when `ttl_hours` disables it.
pub fn spawn_sweeper(service: UploadService, ttl_hours: i64) -> Option<JoinHandle<()>> {
    if ttl_hours <= 0 {
        tracing::info!("Stale upload sweeper disabled");
        return None;
    }

    let ttl = chrono::Duration::hours(ttl_hours);
    tracing::info!(ttl_hours = ttl_hours, "Stale upload sweeper started");

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match service.sweep_stale(ttl).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count = count, "Swept stale uploads"),
                Err(e) => tracing::warn!("Stale upload sweep failed: {}", e),
            }
        }
    }))
}
