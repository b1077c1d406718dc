pub mod annotate;
pub mod cli;
pub mod core;
pub mod dom;
pub mod providers;
pub mod rate_service;
pub mod scheduler;
pub mod store;

use crate::core::cache::Store;
use crate::core::config::AppConfig;
use crate::providers::ExchangeRateApiProvider;
use crate::rate_service::RateService;
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Rates,
    Refresh,
    Annotate {
        input: PathBuf,
        output: Option<PathBuf>,
    },
    Daemon,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("yen-to-freedom starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let data_path = config.default_data_path()?;
    let store = KeyValueStore::open(&data_path);
    let collection = store
        .get_collection("rates", true)
        .context("Rate store is unavailable")?;
    let fetcher = Arc::new(ExchangeRateApiProvider::new(
        &config.providers.exchange_rate.base_url,
    ));
    let service = Arc::new(RateService::new(fetcher, collection));

    match command {
        AppCommand::Rates => cli::rates::run(&service).await,
        AppCommand::Refresh => cli::refresh::run(&service).await,
        AppCommand::Annotate { input, output } => {
            cli::annotate::run(&input, output.as_deref(), service, &config).await
        }
        AppCommand::Daemon => cli::daemon::run(service, &config).await,
    }
}
