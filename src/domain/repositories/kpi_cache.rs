use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::CacheError;

/// Cache of serialized range-query results.
#[async_trait]
pub trait KpiCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove every entry whose key starts with `prefix`. Returns the number
    /// of entries removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}
