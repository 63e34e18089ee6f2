//! Query parsing, search and pagination
//!
//! Turns the raw `search`/`page`/`limit` parameters of an incoming request into
//! a [`Query`], and a query into a [`ResultPage`] using either the dataset
//! cache or a direct upstream passthrough, depending on the configured
//! [`FetchMode`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::DatasetCache;
use crate::data::{record_name, PageSource, Record, UpstreamError};

/// Page size used when the client does not ask for one
pub const DEFAULT_LIMIT: usize = 20;

/// Largest page size a client may request
pub const MAX_LIMIT: usize = 100;

/// Upper bound on the `displayTotal` reported to clients
pub const DISPLAY_CEILING: usize = 1000;

/// Record field matched by searches
pub const DEFAULT_NAME_FIELD: &str = "CONDO_NAME";

/// Where query results come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Search and paginate a local snapshot of the whole dataset
    #[default]
    Cached,
    /// Forward search and pagination to the upstream `q`/`offset`/`limit`
    Passthrough,
}

impl FetchMode {
    /// Parses a mode name from configuration or the command line
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cached" | "cache" => Some(FetchMode::Cached),
            "passthrough" | "direct" => Some(FetchMode::Passthrough),
            _ => None,
        }
    }

    /// Canonical name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Cached => "cached",
            FetchMode::Passthrough => "passthrough",
        }
    }
}

/// Bounds applied when building queries and envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
    pub display_ceiling: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            display_ceiling: DISPLAY_CEILING,
        }
    }
}

/// Query string parameters exactly as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawQuery {
    pub search: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl RawQuery {
    /// Collects the known parameters from decoded query pairs
    ///
    /// The first occurrence of a repeated key wins; unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut raw = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "search" => &mut raw.search,
                "page" => &mut raw.page,
                "limit" => &mut raw.limit,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        raw
    }
}

/// A validated search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Search term, trimmed; empty means "no filter"
    pub search: String,
    /// 1-based page number
    pub page: usize,
    /// Page size, within `1..=max_limit`
    pub limit: usize,
}

impl Query {
    /// Builds a query from raw parameters, substituting defaults for bad values
    ///
    /// Values are never rejected: a missing or non-numeric `page`/`limit` takes
    /// its default, values below 1 become 1, and `limit` is capped at the
    /// configured maximum.
    pub fn from_raw(raw: &RawQuery, limits: &QueryLimits) -> Self {
        let search = raw.search.as_deref().unwrap_or("").trim().to_string();
        let page = parse_positive("page", raw.page.as_deref(), 1);
        let max_limit = limits.max_limit.max(1);
        let limit = parse_positive("limit", raw.limit.as_deref(), limits.default_limit).min(max_limit);

        Self {
            search,
            page,
            limit,
        }
    }

    /// Returns true if the query filters by name
    pub fn has_search(&self) -> bool {
        !self.search.is_empty()
    }

    /// Index of the first record on the requested page
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn parse_positive(name: &str, value: Option<&str>, default: usize) -> usize {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return default.max(1),
    };

    match value.parse::<i64>() {
        Ok(n) if n >= 1 => usize::try_from(n).unwrap_or(usize::MAX),
        Ok(n) => {
            debug!(param = name, value = n, "clamping parameter to 1");
            1
        }
        Err(_) => {
            debug!(param = name, value, default, "non-numeric parameter, using default");
            default.max(1)
        }
    }
}

/// One page of results plus the counts the UI needs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
    /// Records on the requested page
    pub records: Vec<Record>,
    /// Number of records matching the search
    pub total: usize,
    /// `total`, capped at the display ceiling
    pub display_total: usize,
    /// Page that was served
    pub current_page: usize,
    /// Page size that was applied
    pub limit: usize,
    /// Size of the unfiltered dataset, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<usize>,
}

/// Returns true if the record's name contains `needle_lower`
///
/// `needle_lower` must already be lowercased. Records without a string name
/// only match the empty needle.
pub fn matches_name(record: &Record, field: &str, needle_lower: &str) -> bool {
    if needle_lower.is_empty() {
        return true;
    }
    record_name(record, field).is_some_and(|name| name.to_lowercase().contains(needle_lower))
}

/// Case-insensitive substring filter on the name field
pub fn filter_records<'a>(records: &'a [Record], field: &str, term: &str) -> Vec<&'a Record> {
    let needle = term.to_lowercase();
    records
        .iter()
        .filter(|record| matches_name(record, field, &needle))
        .collect()
}

/// Copies out the records of the query's page
pub fn paginate(records: &[&Record], query: &Query) -> Vec<Record> {
    records
        .iter()
        .skip(query.offset())
        .take(query.limit)
        .map(|record| (*record).clone())
        .collect()
}

/// Answers queries in the configured mode
pub struct QueryProcessor<S> {
    mode: FetchMode,
    cache: Arc<DatasetCache<S>>,
    source: Arc<S>,
    name_field: String,
    limits: QueryLimits,
}

impl<S: PageSource> QueryProcessor<S> {
    /// Creates a processor over a cache and the source that feeds it
    pub fn new(
        mode: FetchMode,
        cache: Arc<DatasetCache<S>>,
        source: Arc<S>,
        name_field: impl Into<String>,
        limits: QueryLimits,
    ) -> Self {
        Self {
            mode,
            cache,
            source,
            name_field: name_field.into(),
            limits,
        }
    }

    /// The mode this processor runs in
    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Limits used for parsing and display totals
    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Produces the result page for a query
    pub async fn process(&self, query: &Query) -> Result<ResultPage, UpstreamError> {
        match self.mode {
            FetchMode::Cached => self.process_cached(query).await,
            FetchMode::Passthrough => self.process_passthrough(query).await,
        }
    }

    async fn process_cached(&self, query: &Query) -> Result<ResultPage, UpstreamError> {
        let snapshot = self.cache.get_all().await?;
        let matching = filter_records(&snapshot.records, &self.name_field, &query.search);
        let total = matching.len();

        Ok(ResultPage {
            records: paginate(&matching, query),
            total,
            display_total: total.min(self.limits.display_ceiling),
            current_page: query.page,
            limit: query.limit,
            total_records: Some(snapshot.len()),
        })
    }

    async fn process_passthrough(&self, query: &Query) -> Result<ResultPage, UpstreamError> {
        let offset = query.offset() as u64;
        let search = query.has_search().then_some(query.search.as_str());
        let mut page = self
            .source
            .fetch_page(offset, query.limit as u64, search)
            .await?;

        page.records.truncate(query.limit);
        let total = page
            .total
            .map(|t| usize::try_from(t).unwrap_or(usize::MAX))
            .unwrap_or(query.offset() + page.records.len());

        Ok(ResultPage {
            records: page.records,
            total,
            display_total: total.min(self.limits.display_ceiling),
            current_page: query.page,
            limit: query.limit,
            total_records: None,
        })
    }
}
