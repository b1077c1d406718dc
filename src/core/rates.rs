//! Exchange rate types and the rate source abstractions

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use tokio::sync::broadcast;

/// Currency every listed price is quoted in.
pub const SOURCE_CURRENCY: &str = "JPY";

/// Destination currencies an amount is converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
}

impl Currency {
    /// All destination currencies, in display order.
    pub const ALL: [Currency; 2] = [Currency::USD, Currency::EUR];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "\u{20ac}",
        }
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            _ => Err(anyhow!("Unsupported currency: {}", s)),
        }
    }
}

#[derive(Deserialize)]
struct RawRatePair {
    #[serde(rename = "USD")]
    usd: f64,
    #[serde(rename = "EUR")]
    eur: f64,
}

/// Destination-currency units per one unit of [`SOURCE_CURRENCY`].
///
/// Both rates are positive and finite; this holds for values built with
/// [`RatePair::new`] as well as for deserialized ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRatePair")]
pub struct RatePair {
    #[serde(rename = "USD")]
    usd: f64,
    #[serde(rename = "EUR")]
    eur: f64,
}

impl RatePair {
    pub fn new(usd: f64, eur: f64) -> Result<Self> {
        for (currency, rate) in [(Currency::USD, usd), (Currency::EUR, eur)] {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(anyhow!("Invalid {} rate: {}", currency, rate));
            }
        }
        Ok(Self { usd, eur })
    }

    pub fn get(&self, currency: Currency) -> f64 {
        match currency {
            Currency::USD => self.usd,
            Currency::EUR => self.eur,
        }
    }
}

impl TryFrom<RawRatePair> for RatePair {
    type Error = anyhow::Error;

    fn try_from(raw: RawRatePair) -> Result<Self, Self::Error> {
        RatePair::new(raw.usd, raw.eur)
    }
}

/// An immutable set of rates together with the time they were fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    rates: RatePair,
    fetched_at: DateTime<Utc>,
}

impl RateSnapshot {
    pub fn new(rates: RatePair, fetched_at: DateTime<Utc>) -> Self {
        Self { rates, fetched_at }
    }

    pub fn rates(&self) -> RatePair {
        self.rates
    }

    pub fn rate(&self, currency: Currency) -> f64 {
        self.rates.get(currency)
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// True when the snapshot is older than `max_age` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.fetched_at > max_age
    }
}

/// Where the annotation engine reads rates from.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Latest known snapshot, `None` before the first successful fetch.
    async fn current_rates(&self) -> Result<Option<RateSnapshot>>;

    /// Notifications carrying every newly stored snapshot.
    fn subscribe(&self) -> broadcast::Receiver<RateSnapshot>;
}

/// Fetches a fresh snapshot from a remote rate service.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    async fn fetch_rates(&self) -> Result<RateSnapshot>;
}
