use super::poller::CheckoutPoller;
use crate::error::Error;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Start the polling scheduler.
///
/// The first tick fires immediately, so the service polls once at startup.
pub fn start_scheduler(
    poller: Arc<CheckoutPoller>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Checkout scheduler started (interval: {:?})", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Checkout scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    run_scheduled_poll(&poller).await;
                    let next = chrono::Duration::from_std(period)
                        .ok()
                        .and_then(|p| Utc::now().checked_add_signed(p));
                    poller.set_next_poll_time(next).await;
                }
            }
        }

        poller.set_next_poll_time(None).await;
    })
}

/// One scheduled tick; overlapping ticks are dropped rather than queued
pub async fn run_scheduled_poll(poller: &CheckoutPoller) {
    match poller.try_run_poll_cycle().await {
        Ok(result) => {
            if let Some(err) = &result.fetch_error {
                warn!("Poll finished without calendar data: {}", err);
            } else {
                info!(
                    "Poll finished: {} events, {} actionable checkouts",
                    result.events_seen, result.actionable
                );
            }
        }
        Err(Error::PollInProgress) => {
            warn!("Previous poll still running, skipping this tick");
        }
        Err(e) => {
            error!("Calendar poll job failed: {}", e);
        }
    }
}
