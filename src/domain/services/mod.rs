pub mod breakdowns;
pub mod classifier;
pub mod derived_metrics;
pub mod merge;
pub mod rollup_builder;
pub mod tagger;
pub mod time_bucket;
pub mod transaction_index;
