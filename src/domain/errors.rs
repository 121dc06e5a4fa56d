use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the record store or rollup store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Stored data could not be decoded: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Failures of the range-result cache. Never surfaced to callers: every
/// cache error is logged and treated as a miss.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the KPI service.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum KpiError {
    #[error("Brand not found: {0}")]
    BrandNotFound(i64),

    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Date range of {days} days exceeds the maximum of {max}")]
    RangeTooLarge { days: i64, max: i64 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Rollup for brand {brand_id} on {date} failed after {attempts} attempts: {reason}")]
    UnitFailed {
        brand_id: i64,
        date: NaiveDate,
        attempts: u32,
        reason: String,
    },
}

impl KpiError {
    /// Whether retrying the same unit of work can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KpiError::Store(_))
    }
}

impl From<StoreError> for KpiError {
    fn from(e: StoreError) -> Self {
        KpiError::Store(e.to_string())
    }
}
