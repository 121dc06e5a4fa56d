//! Record store contract.
//!
//! The engine only needs equality and range reads over raw orders, revenue
//! transactions, marketing spend and the customer directory. How raw rows get
//! there (marketplace export parsing) is the ingestion side's concern.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::domain::entities::raw_records::{
    Brand, BuyerHistory, BuyerKey, CustomerLocation, OrderKey, RawMarketingSpend, RawOrder,
    RawRevenueTransaction,
};
use crate::domain::errors::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_brand(&self, brand_id: i64) -> StoreResult<Option<Brand>>;

    async fn list_brands(&self) -> StoreResult<Vec<Brand>>;

    /// Orders created on `date`, ordered by creation time then order code.
    async fn orders_created_on(&self, brand_id: i64, date: NaiveDate) -> StoreResult<Vec<RawOrder>>;

    /// Transactions linked to any of `orders` by `(source, order_code)`,
    /// whatever their date.
    async fn transactions_for_orders(
        &self,
        brand_id: i64,
        orders: &[OrderKey],
    ) -> StoreResult<Vec<RawRevenueTransaction>>;

    async fn marketing_on(&self, brand_id: i64, date: NaiveDate)
        -> StoreResult<Vec<RawMarketingSpend>>;

    /// Directory entries for normalized `usernames`, keyed by normalized username.
    async fn customers_by_username(
        &self,
        brand_id: i64,
        usernames: &[String],
    ) -> StoreResult<HashMap<String, CustomerLocation>>;

    /// Order history strictly before `before` for the given buyers.
    async fn buyer_history(
        &self,
        brand_id: i64,
        buyers: &[BuyerKey],
        before: NaiveDate,
    ) -> StoreResult<HashMap<BuyerKey, BuyerHistory>>;
}
