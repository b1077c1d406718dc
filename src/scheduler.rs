//! Periodic and on-demand rate refreshes.

use crate::core::RateSnapshot;
use crate::rate_service::RateService;
use anyhow::{Result, anyhow};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

type RefreshReply = oneshot::Sender<Result<RateSnapshot>>;

/// Handle used to trigger a refresh by hand. Dropping every handle stops the
/// scheduler.
#[derive(Clone)]
pub struct RefreshHandle {
    requests: mpsc::Sender<RefreshReply>,
}

impl RefreshHandle {
    /// Refreshes now and waits for the outcome.
    pub async fn refresh_now(&self) -> Result<RateSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(reply_tx)
            .await
            .map_err(|_| anyhow!("Refresh scheduler is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("Refresh scheduler stopped before replying"))?
    }
}

/// Starts the refresh loop: a staleness check right away, then one refresh per
/// `interval`, plus whatever is requested through the returned handle.
pub fn spawn_scheduler(
    service: Arc<RateService>,
    interval: Duration,
) -> (RefreshHandle, JoinHandle<()>) {
    let (requests, mut request_rx) = mpsc::channel::<RefreshReply>(8);

    let task = tokio::spawn(async move {
        let max_age = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::days(1));
        if let Err(e) = service.refresh_if_stale(Utc::now(), max_age).await {
            warn!("Startup rate refresh failed: {:#}", e);
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("Scheduled rate refresh triggered");
                    if let Err(e) = service.refresh().await {
                        warn!("Scheduled rate refresh failed: {:#}", e);
                    }
                }
                request = request_rx.recv() => {
                    let Some(reply) = request else {
                        info!("Refresh scheduler shutting down");
                        break;
                    };
                    info!("Manual rate refresh triggered");
                    let _ = reply.send(service.refresh().await);
                }
            }
        }
    });

    (RefreshHandle { requests }, task)
}
