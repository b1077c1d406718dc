//! Store-backed rate source: keeps the latest snapshot and announces refreshes.

use crate::core::cache::KeyValueCollection;
use crate::core::{RateFetcher, RateSnapshot, RateSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const RATES_KEY: &[u8] = b"rates";

pub struct RateService {
    fetcher: Arc<dyn RateFetcher>,
    collection: Arc<dyn KeyValueCollection>,
    changes: broadcast::Sender<RateSnapshot>,
}

impl RateService {
    pub fn new(fetcher: Arc<dyn RateFetcher>, collection: Arc<dyn KeyValueCollection>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            fetcher,
            collection,
            changes,
        }
    }

    /// The stored snapshot, if any. Undecodable data is an error.
    pub async fn cached(&self) -> Result<Option<RateSnapshot>> {
        let Some(raw) = self.collection.get(RATES_KEY).await else {
            return Ok(None);
        };
        let snapshot = serde_json::from_slice(&raw).context("Failed to decode stored rates")?;
        Ok(Some(snapshot))
    }

    /// Fetches, stores and announces a new snapshot.
    pub async fn refresh(&self) -> Result<RateSnapshot> {
        let snapshot = self.fetcher.fetch_rates().await?;
        let encoded = serde_json::to_vec(&snapshot)?;
        self.collection.put(RATES_KEY, &encoded, None).await;
        info!(rates = ?snapshot.rates(), "Rates updated");

        // No receivers simply means no page is listening right now
        let _ = self.changes.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Refreshes when nothing is stored, the stored data is unreadable, or it is
    /// older than `max_age`. Returns the new snapshot when a refresh happened.
    pub async fn refresh_if_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Option<RateSnapshot>> {
        let fresh = match self.cached().await {
            Ok(Some(snapshot)) => !snapshot.is_stale(now, max_age),
            Ok(None) => false,
            Err(e) => {
                debug!("Stored rates unusable: {:#}", e);
                false
            }
        };
        if fresh {
            debug!("Stored rates are fresh");
            return Ok(None);
        }

        info!("Rates stale or missing, fetching...");
        self.refresh().await.map(Some)
    }
}

#[async_trait]
impl RateSource for RateService {
    async fn current_rates(&self) -> Result<Option<RateSnapshot>> {
        self.cached().await
    }

    fn subscribe(&self) -> broadcast::Receiver<RateSnapshot> {
        self.changes.subscribe()
    }
}
