use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Namespace prefixed to every emitted metric name.
pub const METRIC_PREFIX: &str = "conviva";

/// Configuration token that selects every cached filter or lens dimension.
pub const WILDCARD: &str = "_ALL_";

/// Dimension key carrying the filter name.
pub const FILTER_DIMENSION: &str = "filter";

/// Dimension key carrying the account name.
pub const ACCOUNT_DIMENSION: &str = "account";

const LENS_SUFFIX: &str = "_metriclens";

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("Valid non-word regex"));

/// Turns a lens dimension name into a dimension key.
///
/// Every non-word character becomes `_`, so `"CDNs"` stays `"CDNs"` and
/// `"Device Type"` becomes `"Device_Type"`.
pub fn sanitize(name: &str) -> String {
    NON_WORD.replace_all(name, "_").into_owned()
}

/// Metric identifier sent as the `metrics` query parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricParameter(String);

impl MetricParameter {
    /// Creates a new MetricParameter after validation
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, String> {
        let name = name.into();
        if name.is_empty() {
            return Err("metricParameter cannot be empty".to_string());
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!(
                "metricParameter '{}' may only contain ASCII letters, digits and '_'",
                name
            ));
        }
        Ok(MetricParameter(name))
    }

    /// Returns the string representation of the parameter
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lens metrics come back as a matrix broken down by a secondary dimension
    pub fn is_lens(&self) -> bool {
        self.0.ends_with(LENS_SUFFIX)
    }

    /// Fully qualified metric name, `conviva.<parameter>`
    pub fn metric_name(&self) -> String {
        format!("{}.{}", METRIC_PREFIX, self.0)
    }
}

impl TryFrom<String> for MetricParameter {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MetricParameter> for String {
    fn from(value: MetricParameter) -> Self {
        value.0
    }
}

impl fmt::Display for MetricParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which members of a cached list a metric config asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Exactly these names, in this order. Empty means unset.
    Literal(Vec<String>),
    /// Every cached member
    All,
    /// Every cached member except these
    AllExcept(BTreeSet<String>),
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Literal(Vec::new())
    }
}

impl Selection {
    /// Builds a selection from configured tokens.
    ///
    /// A wildcard anywhere in the list selects everything. Literal lists are
    /// de-duplicated keeping first occurrence.
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        if tokens.iter().any(|t| t == WILDCARD) {
            return Selection::All;
        }
        let mut seen = BTreeSet::new();
        Selection::Literal(
            tokens
                .into_iter()
                .filter(|t| seen.insert(t.clone()))
                .collect(),
        )
    }

    /// Narrows a wildcard selection by an exclusion set.
    ///
    /// Literal selections are returned unchanged; the planner removes
    /// excluded names after resolving them.
    pub fn except(self, excluded: &BTreeSet<String>) -> Self {
        match self {
            Selection::All if !excluded.is_empty() => Selection::AllExcept(excluded.clone()),
            Selection::AllExcept(mut already) => {
                already.extend(excluded.iter().cloned());
                Selection::AllExcept(already)
            }
            other => other,
        }
    }

    /// True when nothing was configured
    pub fn is_unset(&self) -> bool {
        matches!(self, Selection::Literal(names) if names.is_empty())
    }
}

/// Kinds of slowly changing reference data fetched from the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    /// `accounts.json`
    Accounts,
    /// `filters.json`
    Filters,
    /// `metriclens_dimension_list.json`
    LensDimensions,
}

impl MetadataKind {
    /// Every kind, in fetch order
    pub const ALL: [MetadataKind; 3] = [
        MetadataKind::Accounts,
        MetadataKind::Filters,
        MetadataKind::LensDimensions,
    ];

    /// API path relative to the base URL
    pub fn path(&self) -> &'static str {
        match self {
            MetadataKind::Accounts => "accounts.json",
            MetadataKind::Filters => "filters.json",
            MetadataKind::LensDimensions => "metriclens_dimension_list.json",
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetadataKind::Accounts => "accounts",
            MetadataKind::Filters => "filters",
            MetadataKind::LensDimensions => "lens dimensions",
        };
        f.write_str(name)
    }
}

/// A server-side filter, addressed by id in queries and by name in dimensions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterRef {
    /// Filter id as returned by `filters.json`
    pub id: String,
    /// Human readable filter name
    pub name: String,
}

/// A metric lens breakdown dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LensDimension {
    /// Numeric dimension id
    pub id: u64,
    /// Dimension name, e.g. `CDNs`
    pub name: String,
}

impl LensDimension {
    /// Dimension key used on emitted datapoints
    pub fn key(&self) -> String {
        sanitize(&self.name)
    }
}

/// One concrete upstream call derived from a metric config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    /// Metric queried
    pub metric: MetricParameter,
    /// Account to query, if configured
    pub account: Option<String>,
    /// Filter batch, at most `maxFiltersPerRequest` long
    pub filters: Vec<FilterRef>,
    /// Lens dimensions queried in this call
    pub lens_dimensions: Vec<LensDimension>,
    /// Lens dimension names that must never be emitted
    pub excluded_lens_dimensions: BTreeSet<String>,
}

impl PlannedRequest {
    /// Path of the metric query endpoint
    pub const PATH: &'static str = "metrics.json";

    /// Query string pairs for this call
    pub fn query(&self) -> Vec<(String, String)> {
        let mut query = vec![("metrics".to_string(), self.metric.as_str().to_string())];
        if let Some(account) = &self.account {
            query.push(("account".to_string(), account.clone()));
        }
        if !self.filters.is_empty() {
            let ids: Vec<&str> = self.filters.iter().map(|f| f.id.as_str()).collect();
            query.push(("filter_ids".to_string(), ids.join(",")));
        }
        if !self.lens_dimensions.is_empty() {
            let ids: Vec<String> = self.lens_dimensions.iter().map(|d| d.id.to_string()).collect();
            query.push(("metriclens_dimension_id".to_string(), ids.join(",")));
        }
        query
    }

    /// Looks up a filter of this batch by id
    pub fn filter_by_id(&self, id: &str) -> Option<&FilterRef> {
        self.filters.iter().find(|f| f.id == id)
    }

    /// Dimensions every datapoint of this request carries
    pub fn base_dimensions(&self) -> BTreeMap<String, String> {
        let mut dimensions = BTreeMap::new();
        if let Some(account) = &self.account {
            dimensions.insert(ACCOUNT_DIMENSION.to_string(), account.clone());
        }
        dimensions
    }
}

impl fmt::Display for PlannedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (account: {}, filters: {}, lens dimensions: {})",
            self.metric,
            self.account.as_deref().unwrap_or("default"),
            self.filters.len(),
            self.lens_dimensions.len()
        )
    }
}

/// A single metric value ready for emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Monitor-prefixed metric name
    pub metric: String,
    /// Metric value
    pub value: f64,
    /// Dimension key/value pairs
    pub dimensions: BTreeMap<String, String>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl Datapoint {
    /// Creates a datapoint stamped with the current time
    pub fn new(metric: impl Into<String>, value: f64, dimensions: BTreeMap<String, String>) -> Self {
        Self {
            metric: metric.into(),
            value,
            dimensions,
            timestamp: Utc::now(),
        }
    }

    /// Merges static dimensions, overriding any existing key
    pub fn with_extra_dimensions(mut self, extra: &BTreeMap<String, String>) -> Self {
        for (key, value) in extra {
            self.dimensions.insert(key.clone(), value.clone());
        }
        self
    }

    /// Returns the value of a dimension
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions.get(key).map(String::as_str)
    }
}
