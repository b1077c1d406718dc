pub mod annotate;
pub mod daemon;
pub mod rates;
pub mod refresh;
pub mod setup;
pub mod ui;
