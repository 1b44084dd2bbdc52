//! Converts Pulse metric responses into datapoints.
//!
//! Simple metrics yield one datapoint per requested filter (or one in total
//! for unfiltered queries). Metric lens responses are tables: every cell of
//! every returned dimension becomes a datapoint named after the lens
//! sub-metric of its column.

use crate::core::types::FILTER_DIMENSION;
use crate::core::{sanitize, Datapoint, MonitorError, PlannedRequest};
use crate::upstream::RawResponse;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Reasons a response cannot be mapped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// Body is not the expected JSON shape
    #[error("malformed response for metric '{metric}': {reason}")]
    Malformed { metric: String, reason: String },

    /// Body does not mention the requested metric
    #[error("response does not contain metric '{0}'")]
    MissingMetric(String),

    /// A lens table references a row or column that does not exist
    #[error("metric lens table for '{metric}' is inconsistent: {reason}")]
    InconsistentTable { metric: String, reason: String },
}

impl From<MapError> for MonitorError {
    fn from(err: MapError) -> Self {
        MonitorError::Mapping(err.to_string())
    }
}

/// A value as sent by the API: a single number or a series
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Sample {
    Value(Option<f64>),
    Series(Vec<Option<f64>>),
}

impl Sample {
    /// Latest non-null value
    fn latest(&self) -> Option<f64> {
        match self {
            Sample::Value(value) => *value,
            Sample::Series(values) => values.iter().rev().find_map(|v| *v),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SimpleMetric {
    #[serde(default)]
    filters: Option<BTreeMap<String, Sample>>,
    #[serde(default)]
    value: Option<Sample>,
}

#[derive(Debug, Deserialize)]
struct LensMetric {
    metrics: Vec<String>,
    #[serde(default)]
    dimensions: BTreeMap<String, LensTableSet>,
}

#[derive(Debug, Deserialize)]
struct LensTableSet {
    name: String,
    #[serde(default)]
    xvalues: Vec<serde_json::Value>,
    #[serde(default)]
    tables: BTreeMap<String, LensTable>,
}

#[derive(Debug, Deserialize)]
struct LensTable {
    #[serde(default)]
    rows: Vec<Vec<Option<f64>>>,
}

/// Maps one response body to datapoints for the request that produced it
pub fn map(response: &RawResponse, request: &PlannedRequest) -> Result<Vec<Datapoint>, MapError> {
    let metric = request.metric.as_str();
    let malformed = |reason: String| MapError::Malformed {
        metric: metric.to_string(),
        reason,
    };

    let mut body: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&response.body).map_err(|e| malformed(e.to_string()))?;
    let payload = body
        .remove(metric)
        .ok_or_else(|| MapError::MissingMetric(metric.to_string()))?;

    if request.metric.is_lens() {
        let lens: LensMetric =
            serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?;
        map_lens(lens, request)
    } else {
        let simple: SimpleMetric =
            serde_json::from_value(payload).map_err(|e| malformed(e.to_string()))?;
        map_simple(simple, request).map_err(malformed)
    }
}

fn map_simple(
    metric: SimpleMetric,
    request: &PlannedRequest,
) -> Result<Vec<Datapoint>, String> {
    let name = request.metric.metric_name();

    if request.filters.is_empty() {
        let sample = metric
            .value
            .ok_or_else(|| "unfiltered response has no 'value'".to_string())?;
        return Ok(sample
            .latest()
            .map(|value| Datapoint::new(name, value, request.base_dimensions()))
            .into_iter()
            .collect());
    }

    let samples = metric
        .filters
        .ok_or_else(|| "filtered response has no 'filters'".to_string())?;

    Ok(request
        .filters
        .iter()
        .filter_map(|filter| {
            let value = samples.get(&filter.id)?.latest()?;
            let mut dimensions = request.base_dimensions();
            dimensions.insert(FILTER_DIMENSION.to_string(), filter.name.clone());
            Some(Datapoint::new(name.clone(), value, dimensions))
        })
        .collect())
}

fn map_lens(lens: LensMetric, request: &PlannedRequest) -> Result<Vec<Datapoint>, MapError> {
    let metric = request.metric.as_str();
    let inconsistent = |reason: String| MapError::InconsistentTable {
        metric: metric.to_string(),
        reason,
    };

    let mut datapoints = Vec::new();

    for set in lens.dimensions.into_values() {
        if request.excluded_lens_dimensions.contains(&set.name) {
            tracing::trace!(metric, dimension = %set.name, "dropping excluded lens dimension");
            continue;
        }
        let key = sanitize(&set.name);

        // An unfiltered query has a single table; extra ones would repeat its series.
        let tables = if request.filters.is_empty() && set.tables.len() > 1 {
            tracing::warn!(
                metric,
                dimension = %set.name,
                tables = set.tables.len(),
                "unfiltered response has several tables, mapping only the first"
            );
            1
        } else {
            set.tables.len()
        };

        for (filter_id, table) in set.tables.iter().take(tables) {
            let filter_name = if request.filters.is_empty() {
                None
            } else {
                match request.filter_by_id(filter_id) {
                    Some(filter) => Some(filter.name.as_str()),
                    None => {
                        tracing::debug!(metric, filter_id = %filter_id, "ignoring table for unrequested filter");
                        continue;
                    }
                }
            };

            for (row_index, row) in table.rows.iter().enumerate() {
                let xvalue = set.xvalues.get(row_index).ok_or_else(|| {
                    inconsistent(format!(
                        "dimension '{}' has row {} but only {} xvalues",
                        set.name,
                        row_index,
                        set.xvalues.len()
                    ))
                })?;

                for (column, cell) in row.iter().enumerate() {
                    let Some(value) = cell else { continue };
                    let submetric = lens.metrics.get(column).ok_or_else(|| {
                        inconsistent(format!(
                            "row has column {} but only {} metrics",
                            column,
                            lens.metrics.len()
                        ))
                    })?;

                    let mut dimensions = request.base_dimensions();
                    dimensions.insert(key.clone(), xvalue_label(xvalue));
                    if let Some(filter) = filter_name {
                        dimensions.insert(FILTER_DIMENSION.to_string(), filter.to_string());
                    }
                    datapoints.push(Datapoint::new(
                        format!("{}.{}", request.metric.metric_name(), submetric),
                        *value,
                        dimensions,
                    ));
                }
            }
        }
    }

    Ok(datapoints)
}

fn xvalue_label(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FilterRef, LensDimension, MetricParameter};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn request(metric: &str, filters: &[(&str, &str)]) -> PlannedRequest {
        PlannedRequest {
            metric: MetricParameter::new(metric).unwrap(),
            account: None,
            filters: filters
                .iter()
                .map(|(id, name)| FilterRef {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            lens_dimensions: Vec::new(),
            excluded_lens_dimensions: BTreeSet::new(),
        }
    }

    fn summary(datapoints: &[Datapoint]) -> Vec<(String, f64, BTreeMap<String, String>)> {
        let mut rows: Vec<_> = datapoints
            .iter()
            .map(|dp| (dp.metric.clone(), dp.value, dp.dimensions.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));
        rows
    }

    fn dims(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_unfiltered_simple_metric_has_no_filter_dimension() {
        let response = RawResponse::new(
            200,
            r#"{"concurrent_plays": {"type": "simple", "value": 1234}}"#,
        );

        let datapoints = map(&response, &request("concurrent_plays", &[])).unwrap();

        assert_eq!(datapoints.len(), 1);
        assert_eq!(datapoints[0].metric, "conviva.concurrent_plays");
        assert_eq!(datapoints[0].value, 1234.0);
        assert!(datapoints[0].dimensions.is_empty());
    }

    #[test]
    fn test_filtered_simple_metric_uses_latest_sample() {
        let response = RawResponse::new(
            200,
            r#"{"plays": {"type": "simple", "filters": {
                "1": [10, 11, null],
                "2": 5,
                "9": 99
            }}}"#,
        );
        let mut req = request("plays", &[("1", "All Traffic"), ("2", "Mobile")]);
        req.account = Some("acme".into());

        let datapoints = map(&response, &req).unwrap();

        assert_eq!(
            summary(&datapoints),
            vec![
                (
                    "conviva.plays".to_string(),
                    11.0,
                    dims(&[("account", "acme"), ("filter", "All Traffic")])
                ),
                (
                    "conviva.plays".to_string(),
                    5.0,
                    dims(&[("account", "acme"), ("filter", "Mobile")])
                ),
            ]
        );
    }

    #[test]
    fn test_lens_cells_become_submetric_datapoints() {
        let response = RawResponse::new(
            200,
            r#"{"quality_metriclens": {
                "type": "metriclens",
                "metrics": ["plays", "rebuffering_ratio"],
                "dimensions": {
                    "7": {
                        "name": "Device Type",
                        "xvalues": ["Mobile", "Desktop"],
                        "tables": {"1": {"rows": [[3, 0.5], [4, null]]}}
                    }
                }
            }}"#,
        );
        let mut req = request("quality_metriclens", &[("1", "All Traffic")]);
        req.lens_dimensions = vec![LensDimension {
            id: 7,
            name: "Device Type".into(),
        }];

        let datapoints = map(&response, &req).unwrap();

        assert_eq!(
            summary(&datapoints),
            vec![
                (
                    "conviva.quality_metriclens.plays".to_string(),
                    4.0,
                    dims(&[("Device_Type", "Desktop"), ("filter", "All Traffic")])
                ),
                (
                    "conviva.quality_metriclens.plays".to_string(),
                    3.0,
                    dims(&[("Device_Type", "Mobile"), ("filter", "All Traffic")])
                ),
                (
                    "conviva.quality_metriclens.rebuffering_ratio".to_string(),
                    0.5,
                    dims(&[("Device_Type", "Mobile"), ("filter", "All Traffic")])
                ),
            ]
        );
    }

    #[test]
    fn test_excluded_lens_dimension_is_dropped() {
        let response = RawResponse::new(
            200,
            r#"{"quality_metriclens": {
                "type": "metriclens",
                "metrics": ["plays"],
                "dimensions": {
                    "3": {"name": "CDNs", "xvalues": ["Akamai"], "tables": {"0": {"rows": [[1]]}}},
                    "5": {"name": "Cities", "xvalues": ["Oslo"], "tables": {"0": {"rows": [[2]]}}}
                }
            }}"#,
        );
        let mut req = request("quality_metriclens", &[]);
        req.excluded_lens_dimensions.insert("CDNs".into());

        let datapoints = map(&response, &req).unwrap();

        assert_eq!(datapoints.len(), 1);
        assert_eq!(datapoints[0].dimension("Cities"), Some("Oslo"));
        assert_eq!(datapoints[0].dimension("filter"), None);
        assert!(datapoints.iter().all(|dp| dp.dimension("CDNs").is_none()));
    }

    #[test]
    fn test_unfiltered_lens_maps_only_first_table() {
        let response = RawResponse::new(
            200,
            r#"{"quality_metriclens": {
                "type": "metriclens",
                "metrics": ["plays"],
                "dimensions": {
                    "5": {
                        "name": "Cities",
                        "xvalues": ["Oslo"],
                        "tables": {"0": {"rows": [[2]]}, "9": {"rows": [[40]]}}
                    }
                }
            }}"#,
        );

        let datapoints = map(&response, &request("quality_metriclens", &[])).unwrap();

        assert_eq!(datapoints.len(), 1);
        assert_eq!(datapoints[0].value, 2.0);
        assert_eq!(datapoints[0].dimension("Cities"), Some("Oslo"));
    }

    #[test]
    fn test_missing_metric_is_an_error() {
        let response = RawResponse::new(200, r#"{"other": {"value": 1}}"#);
        assert_eq!(
            map(&response, &request("plays", &[])),
            Err(MapError::MissingMetric("plays".into()))
        );
    }

    #[test]
    fn test_malformed_bodies_are_errors() {
        let req = request("plays", &[("1", "All Traffic")]);

        let not_json = RawResponse::new(200, "<html>");
        assert!(matches!(map(&not_json, &req), Err(MapError::Malformed { .. })));

        let no_filters = RawResponse::new(200, r#"{"plays": {"value": 3}}"#);
        assert!(matches!(map(&no_filters, &req), Err(MapError::Malformed { .. })));

        let bad_sample = RawResponse::new(200, r#"{"plays": {"filters": {"1": "lots"}}}"#);
        assert!(matches!(map(&bad_sample, &req), Err(MapError::Malformed { .. })));
    }

    #[test]
    fn test_lens_row_without_xvalue_is_inconsistent() {
        let response = RawResponse::new(
            200,
            r#"{"audience_metriclens": {
                "metrics": ["plays"],
                "dimensions": {"3": {"name": "CDNs", "xvalues": [], "tables": {"0": {"rows": [[1]]}}}}
            }}"#,
        );

        let err = map(&response, &request("audience_metriclens", &[])).unwrap_err();
        assert!(matches!(err, MapError::InconsistentTable { .. }));
        assert_eq!(MonitorError::from(err).category(), "mapping");
    }
}
