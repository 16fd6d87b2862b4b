//! Background expiry of lapsed holds.
//!
//! Reads and guarded commits already treat lapsed holds as expired, so the
//! sweeper only keeps stored statuses tidy for reporting. Failures are
//! logged and retried on the next tick.

use staybook_core::manager::BookingManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawn a task sweeping lapsed holds every `period` until `shutdown`
/// flips to `true` or its sender is dropped.
pub fn spawn(
    manager: Arc<BookingManager>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = period.as_secs(), "Hold sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = manager.sweep_expired_holds().await {
                        tracing::warn!(error = %e, "Sweep of lapsed holds failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Hold sweeper stopped");
    })
}
