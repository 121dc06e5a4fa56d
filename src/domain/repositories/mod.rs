pub mod kpi_cache;
pub mod record_store;
pub mod rollup_store;
