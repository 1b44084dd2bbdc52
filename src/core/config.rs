//! Configuration management for the Conviva monitor.
//!
//! This module provides configuration handling with:
//! - YAML file support using the agent's camelCase keys
//! - Strongly typed metric configs, validated while parsing
//! - CLI and environment overrides through [`ConfigBuilder`]

use crate::core::retry::RetryPolicy;
use crate::core::secret::Secret;
use crate::core::types::{MetricParameter, Selection, WILDCARD};
use crate::core::{MonitorError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Default Pulse API location
pub const DEFAULT_API_URL: &str = "https://api.conviva.com/insights/2.4/";

/// Default upper bound on filters sent in one metric query
pub const DEFAULT_MAX_FILTERS_PER_REQUEST: usize = 5;

/// Metric collected when no metric configs are given
pub const DEFAULT_METRIC_PARAMETER: &str = "quality_metriclens";

/// Filter applied to the default metric config
pub const DEFAULT_FILTER: &str = "All Traffic";

/// Complete configuration for one monitor instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Pulse API username
    pub pulse_username: Secret,
    /// Pulse API password
    pub pulse_password: Secret,
    /// Base URL of the Pulse API
    pub api_url: String,
    /// Collection interval in seconds
    pub interval_seconds: u64,
    /// Timeout for a single HTTP request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Age after which cached metadata is fetched again
    #[serde(with = "humantime_serde")]
    pub metadata_refresh_interval: Duration,
    /// Upper bound on metric queries in flight during a tick
    pub max_concurrent_requests: usize,
    /// Retry policy for every upstream call
    pub retry: RetryPolicy,
    /// What to do when a tick outlives its interval
    pub overrun_policy: OverrunPolicy,
    /// Static dimensions added to every datapoint
    pub extra_dimensions: BTreeMap<String, String>,
    /// Metrics to collect
    pub metric_configs: Vec<MetricConfig>,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Behaviour when a tick is still running at the next interval boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Let the tick finish, log the lateness and skip the missed ticks
    #[default]
    Complete,
    /// Abandon outstanding upstream calls once the interval elapses
    Cancel,
}

/// One metric to collect, as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMetricConfig", into = "RawMetricConfig")]
pub struct MetricConfig {
    /// Metric or metric lens to query
    pub metric_parameter: MetricParameter,
    /// Account to query; the API default account when unset
    pub account: Option<String>,
    /// Filters to scope the metric by
    pub filters: Selection,
    /// Upper bound on filters per upstream call
    pub max_filters_per_request: NonZeroUsize,
    /// Lens dimensions to break the metric down by
    pub lens_dimensions: Selection,
    /// Lens dimensions never to emit
    pub exclude_lens_dimensions: BTreeSet<String>,
}

/// Wire form of [`MetricConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct RawMetricConfig {
    metric_parameter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<String>,
    filters: Vec<String>,
    max_filters_per_request: usize,
    metric_lens_dimensions: Vec<String>,
    exclude_metric_lens_dimensions: Vec<String>,
}

impl Default for RawMetricConfig {
    fn default() -> Self {
        RawMetricConfig {
            metric_parameter: DEFAULT_METRIC_PARAMETER.to_string(),
            account: None,
            filters: Vec::new(),
            max_filters_per_request: DEFAULT_MAX_FILTERS_PER_REQUEST,
            metric_lens_dimensions: Vec::new(),
            exclude_metric_lens_dimensions: Vec::new(),
        }
    }
}

impl TryFrom<RawMetricConfig> for MetricConfig {
    type Error = String;

    fn try_from(raw: RawMetricConfig) -> std::result::Result<Self, Self::Error> {
        let metric_parameter = MetricParameter::new(raw.metric_parameter)?;

        let max_filters_per_request =
            NonZeroUsize::new(raw.max_filters_per_request).ok_or_else(|| {
                format!(
                    "maxFiltersPerRequest must be greater than 0 for metric '{}'",
                    metric_parameter
                )
            })?;

        if let Some(account) = &raw.account {
            if account.trim().is_empty() {
                return Err(format!("account cannot be blank for metric '{}'", metric_parameter));
            }
        }

        if raw.filters.iter().any(|f| f.trim().is_empty()) {
            return Err(format!("filters cannot contain blank names for metric '{}'", metric_parameter));
        }

        let has_lens_options = !raw.metric_lens_dimensions.is_empty()
            || !raw.exclude_metric_lens_dimensions.is_empty();
        if has_lens_options && !metric_parameter.is_lens() {
            return Err(format!(
                "metricLensDimensions and excludeMetricLensDimensions only apply to metric lens \
                 parameters, '{}' is not one",
                metric_parameter
            ));
        }

        let exclude_lens_dimensions: BTreeSet<String> =
            raw.exclude_metric_lens_dimensions.into_iter().collect();
        if exclude_lens_dimensions.contains(WILDCARD) {
            return Err(format!(
                "excludeMetricLensDimensions cannot contain {} for metric '{}'",
                WILDCARD, metric_parameter
            ));
        }

        let lens_dimensions =
            Selection::from_tokens(raw.metric_lens_dimensions).except(&exclude_lens_dimensions);

        Ok(MetricConfig {
            metric_parameter,
            account: raw.account,
            filters: Selection::from_tokens(raw.filters),
            max_filters_per_request,
            lens_dimensions,
            exclude_lens_dimensions,
        })
    }
}

impl From<MetricConfig> for RawMetricConfig {
    fn from(config: MetricConfig) -> Self {
        fn tokens(selection: Selection) -> Vec<String> {
            match selection {
                Selection::Literal(names) => names,
                Selection::All | Selection::AllExcept(_) => vec![WILDCARD.to_string()],
            }
        }

        RawMetricConfig {
            metric_parameter: config.metric_parameter.into(),
            account: config.account,
            filters: tokens(config.filters),
            max_filters_per_request: config.max_filters_per_request.get(),
            metric_lens_dimensions: tokens(config.lens_dimensions),
            exclude_metric_lens_dimensions: config.exclude_lens_dimensions.into_iter().collect(),
        }
    }
}

impl MetricConfig {
    /// Config for a metric with no account, filters or lens dimensions
    pub fn new(metric_parameter: MetricParameter) -> Self {
        MetricConfig {
            metric_parameter,
            account: None,
            filters: Selection::default(),
            max_filters_per_request: NonZeroUsize::new(DEFAULT_MAX_FILTERS_PER_REQUEST)
                .expect("Valid default batch size"),
            lens_dimensions: Selection::default(),
            exclude_lens_dimensions: BTreeSet::new(),
        }
    }

    /// Parses a single metric config from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| MonitorError::config(format!("Failed to parse metric config: {}", e)))
    }
}

/// Metric configs used when none are configured
pub fn default_metric_configs() -> Vec<MetricConfig> {
    let parameter =
        MetricParameter::new(DEFAULT_METRIC_PARAMETER).expect("Valid default metric parameter");
    let mut config = MetricConfig::new(parameter);
    config.filters = Selection::Literal(vec![DEFAULT_FILTER.to_string()]);
    vec![config]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pulse_username: Secret::default(),
            pulse_password: Secret::default(),
            api_url: DEFAULT_API_URL.to_string(),
            interval_seconds: 10,
            timeout: Duration::from_secs(10),
            metadata_refresh_interval: Duration::from_secs(3600), // 1 hour
            max_concurrent_requests: 4,
            retry: RetryPolicy::default(),
            overrun_policy: OverrunPolicy::Complete,
            extra_dimensions: BTreeMap::new(),
            metric_configs: default_metric_configs(),
            debug: false,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// Messages name the offending key and never echo credential values.
    pub fn validate(&self) -> Result<()> {
        if self.pulse_username.is_empty() {
            return Err(MonitorError::config("pulseUsername is required"));
        }
        if self.pulse_password.is_empty() {
            return Err(MonitorError::config("pulsePassword is required"));
        }

        self.api_base()?;

        if self.interval_seconds == 0 {
            return Err(MonitorError::config("intervalSeconds must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(MonitorError::config("timeout must be greater than 0"));
        }
        if self.metadata_refresh_interval.is_zero() {
            return Err(MonitorError::config("metadataRefreshInterval must be greater than 0"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(MonitorError::config("maxConcurrentRequests must be greater than 0"));
        }

        self.retry.validate()?;

        if self.metric_configs.is_empty() {
            return Err(MonitorError::config("metricConfigs must contain at least one entry"));
        }

        if let Some(key) = self.extra_dimensions.keys().find(|k| k.trim().is_empty()) {
            return Err(MonitorError::config(format!(
                "extraDimensions contains a blank key: '{}'",
                key
            )));
        }

        Ok(())
    }

    /// Parsed API base URL, always ending in `/`
    pub fn api_base(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| MonitorError::config(format!("apiUrl is not a valid URL: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonitorError::config(format!(
                "apiUrl must use http or https, got '{}'",
                url.scheme()
            )));
        }
        // Credentials belong in pulseUsername/pulsePassword, where they stay redacted.
        if !url.username().is_empty() || url.password().is_some() {
            return Err(MonitorError::config("apiUrl must not embed credentials"));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Collection interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Configuration builder for programmatic construction
#[derive(Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| MonitorError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub async fn from_file(self, path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MonitorError::config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        self.from_yaml(&content)
    }

    /// Set the Pulse username
    pub fn username(mut self, username: impl Into<Secret>) -> Self {
        self.config.pulse_username = username.into();
        self
    }

    /// Set the Pulse password
    pub fn password(mut self, password: impl Into<Secret>) -> Self {
        self.config.pulse_password = password.into();
        self
    }

    /// Set the API base URL
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    /// Set the collection interval in seconds
    pub fn interval_seconds(mut self, seconds: u64) -> Self {
        self.config.interval_seconds = seconds;
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the metadata staleness threshold
    pub fn metadata_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.metadata_refresh_interval = interval;
        self
    }

    /// Set the number of metric queries allowed in flight
    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.config.max_concurrent_requests = limit;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the overrun policy
    pub fn overrun_policy(mut self, policy: OverrunPolicy) -> Self {
        self.config.overrun_policy = policy;
        self
    }

    /// Add a static dimension
    pub fn extra_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_dimensions.insert(key.into(), value.into());
        self
    }

    /// Replace the metric configs
    pub fn metric_configs(mut self, configs: Vec<MetricConfig>) -> Self {
        self.config.metric_configs = configs;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
