use crate::core::{RateFetcher, RatePair, RateSnapshot, SOURCE_CURRENCY};
use crate::providers::util::{RetryPolicy, with_retry};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Client for the exchangerate-api.com `latest` endpoint.
pub struct ExchangeRateApiProvider {
    base_url: String,
}

impl ExchangeRateApiProvider {
    pub fn new(base_url: &str) -> Self {
        ExchangeRateApiProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    rates: HashMap<String, f64>,
}

#[async_trait]
impl RateFetcher for ExchangeRateApiProvider {
    #[instrument(name = "ExchangeRateFetch", skip(self))]
    async fn fetch_rates(&self) -> Result<RateSnapshot> {
        let url = format!("{}/v4/latest/{}", self.base_url, SOURCE_CURRENCY);
        debug!("Requesting exchange rates from {}", url);

        let client = reqwest::Client::builder()
            .user_agent(concat!("yen-to-freedom/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let response = with_retry(|| client.get(&url).send(), RetryPolicy::RATE_REQUEST)
            .await
            .with_context(|| format!("Failed to request exchange rates from {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Exchange rate request failed with HTTP {}", status));
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read exchange rate response")?;
        let latest: LatestRatesResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse exchange rate response: '{response_text}'"))?;

        let usd = latest
            .rates
            .get("USD")
            .copied()
            .ok_or_else(|| anyhow!("Exchange rate response has no USD rate"))?;
        let eur = latest
            .rates
            .get("EUR")
            .copied()
            .ok_or_else(|| anyhow!("Exchange rate response has no EUR rate"))?;

        let snapshot = RateSnapshot::new(RatePair::new(usd, eur)?, Utc::now());
        debug!(?snapshot, "Fetched exchange rates");
        Ok(snapshot)
    }
}
