pub mod date_range;
pub mod normalized_text;
pub mod source_filter;
