//! Key-value storage abstractions used to keep rates across runs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A named bucket of byte keys and values.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Stores `value`; entries with a `ttl` disappear once it elapses.
    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>);

    async fn remove(&self, key: &[u8]);

    async fn clear(&self);
}

/// A set of collections, either persisted to disk or kept in memory.
pub trait Store: Send + Sync {
    fn get_collection(&self, name: &str, persist: bool) -> Option<Arc<dyn KeyValueCollection>>;

    fn remove_collection(&self, name: &str) -> bool;
}
