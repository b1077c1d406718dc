//! Core abstractions shared by the engine, the rate service and the CLI

pub mod cache;
pub mod config;
pub mod log;
pub mod rates;

// Re-export main types for cleaner imports
pub use rates::{Currency, RateFetcher, RatePair, RateSnapshot, RateSource, SOURCE_CURRENCY};
