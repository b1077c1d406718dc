//! Price annotation: locating yen amounts in a page and showing them in
//! the destination currencies.

pub mod engine;
pub mod format;
pub mod locator;
pub mod parser;
pub mod render;
pub mod watcher;

pub use engine::{ConversionEngine, EngineStats, PassOutcome, PassReport, SharedDocument};
pub use locator::{PriceLocator, Role, Scope};
pub use watcher::{DebounceTimer, MutationBatch, MutationWatcher};
