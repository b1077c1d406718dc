use super::ui;
use crate::core::{Currency, RateSnapshot, SOURCE_CURRENCY};
use crate::rate_service::RateService;
use anyhow::Result;
use chrono::Local;
use comfy_table::{Cell, Table};

/// Rates per source unit and the time of the last update.
pub fn display_as_table(snapshot: Option<&RateSnapshot>) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Currency"),
        ui::header_cell(&format!("Rate (per 1 {SOURCE_CURRENCY})")),
    ]);

    for currency in Currency::ALL {
        table.add_row(vec![
            Cell::new(format!("{} ({})", currency, currency.symbol())),
            ui::format_optional_cell(snapshot.map(|s| s.rate(currency)), |rate| {
                format!("{rate:.6}")
            }),
        ]);
    }
    table
}

pub fn last_update_text(snapshot: Option<&RateSnapshot>) -> String {
    snapshot.map_or_else(
        || "Never".to_string(),
        |s| {
            s.fetched_at()
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        },
    )
}

pub fn print_rates(snapshot: Option<&RateSnapshot>) {
    println!("{}", ui::style_text("Exchange rates", ui::StyleType::Title));
    println!("{}", display_as_table(snapshot));
    println!(
        "{} {}",
        ui::style_text("Last update:", ui::StyleType::Subtle),
        last_update_text(snapshot)
    );
}

/// Shows the stored rates without fetching.
pub async fn run(service: &RateService) -> Result<()> {
    let snapshot = service.cached().await?;
    if snapshot.is_none() {
        println!(
            "{}",
            ui::style_text(
                "No rates stored yet. Run `refresh` to fetch them.",
                ui::StyleType::Subtle
            )
        );
    }
    print_rates(snapshot.as_ref());
    Ok(())
}
