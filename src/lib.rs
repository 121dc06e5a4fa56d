//! Seller KPI Engine Library
//!
//! Builds daily KPI rollups for marketplace sellers from raw orders, revenue
//! transactions and marketing spend, and answers range queries over them.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod task_runner;
