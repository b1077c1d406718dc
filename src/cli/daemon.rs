use crate::core::config::AppConfig;
use crate::rate_service::RateService;
use crate::scheduler::spawn_scheduler;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Keeps the stored rates fresh until Ctrl-C.
pub async fn run(service: Arc<RateService>, config: &AppConfig) -> Result<()> {
    let interval = config.refresh.interval();
    info!(
        "Refreshing rates every {} hour(s). Press Ctrl-C to stop.",
        interval.as_secs() / 3600
    );

    let (handle, task) = spawn_scheduler(service, interval);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping refresh scheduler");
    drop(handle);
    task.await.context("Refresh scheduler panicked")?;
    Ok(())
}
