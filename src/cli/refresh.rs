use super::{rates, ui};
use crate::rate_service::RateService;
use anyhow::Result;
use tracing::info;

/// Fetches fresh rates now and shows them.
pub async fn run(service: &RateService) -> Result<()> {
    let spinner = ui::new_spinner("Fetching exchange rates...");
    let result = service.refresh().await;
    spinner.finish_and_clear();

    let snapshot = result?;
    info!("Manual refresh complete");
    println!("{}", ui::style_text("Rates updated", ui::StyleType::Value));
    rates::print_rates(Some(&snapshot));
    Ok(())
}
