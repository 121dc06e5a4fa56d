use std::fmt;

/// Marketplace source selection for range queries.
///
/// `None` or the literal `"all"` select the Total rollup rows. A
/// comma-separated list selects PerSource rows for exactly those sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    All,
    Sources(Vec<String>),
}

/// How a [`SourceFilter`] is served by the range aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStrategy {
    /// Read Total rows directly.
    All,
    /// No usable source: zero-filled placeholders, nothing is read.
    Empty,
    /// Read and merge PerSource rows for these sources (sorted, deduplicated).
    Filtered(Vec<String>),
}

impl SourceFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => SourceFilter::All,
            Some(value) if value.trim().eq_ignore_ascii_case("all") => SourceFilter::All,
            Some(value) => SourceFilter::Sources(
                value
                    .split(',')
                    .map(|s| s.to_string())
                    .collect(),
            ),
        }
    }

    pub fn sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SourceFilter::Sources(sources.into_iter().map(Into::into).collect())
    }

    pub fn strategy(&self) -> SourceStrategy {
        match self {
            SourceFilter::All => SourceStrategy::All,
            SourceFilter::Sources(list) => {
                let mut cleaned: Vec<String> = list
                    .iter()
                    .map(|s| normalize_source(s))
                    .filter(|s| !s.is_empty())
                    .collect();
                cleaned.sort();
                cleaned.dedup();

                if cleaned.is_empty() {
                    SourceStrategy::Empty
                } else if cleaned.iter().any(|s| s == "all") {
                    SourceStrategy::All
                } else {
                    SourceStrategy::Filtered(cleaned)
                }
            }
        }
    }

    /// Cache key segment: sorted source list joined by `,`, or `all`.
    pub fn cache_segment(&self) -> String {
        match self.strategy() {
            SourceStrategy::All => "all".to_string(),
            SourceStrategy::Empty => "none".to_string(),
            SourceStrategy::Filtered(sources) => sources.join(","),
        }
    }
}

impl Default for SourceFilter {
    fn default() -> Self {
        SourceFilter::All
    }
}

impl fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_segment())
    }
}

/// Canonical form of a source tag as stored on raw records and rollup rows.
pub fn normalize_source(raw: &str) -> String {
    raw.trim().to_lowercase()
}
