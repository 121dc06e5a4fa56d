pub mod order_category;
pub mod raw_records;
pub mod rollup;
