//! Expands metric configs into concrete upstream calls.
//!
//! Planning is a pure function of a [`MetricConfig`] and a
//! [`MetadataSnapshot`]: it performs no I/O and returns the same requests for
//! the same inputs.

use crate::core::{
    FilterRef, LensDimension, MetadataKind, MetricConfig, MonitorError, PlannedRequest, Selection,
};
use crate::metadata::MetadataSnapshot;
use std::collections::BTreeSet;
use thiserror::Error;

/// Reasons a metric config yields no requests for a tick
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Metadata the config depends on could not be fetched this tick
    #[error("{0} metadata is not available")]
    MetadataMissing(MetadataKind),

    /// The configured account is not visible to the credentials
    #[error("account '{0}' does not exist")]
    UnknownAccount(String),

    /// None of the configured names exist in the cached metadata
    #[error("no configured {kind} exist: {}", .names.join(", "))]
    UnknownNames {
        kind: MetadataKind,
        names: Vec<String>,
    },
}

impl From<PlanError> for MonitorError {
    fn from(err: PlanError) -> Self {
        MonitorError::Planning(err.to_string())
    }
}

/// Metadata kinds `config` needs before it can be planned
pub fn required_metadata(config: &MetricConfig) -> BTreeSet<MetadataKind> {
    let mut kinds = BTreeSet::new();
    if config.account.is_some() {
        kinds.insert(MetadataKind::Accounts);
    }
    if !config.filters.is_unset() {
        kinds.insert(MetadataKind::Filters);
    }
    if config.metric_parameter.is_lens() && !config.lens_dimensions.is_unset() {
        kinds.insert(MetadataKind::LensDimensions);
    }
    kinds
}

/// Plans the upstream calls for one metric config.
///
/// Filters are resolved and split into batches of at most
/// `max_filters_per_request`; every batch becomes one request carrying the
/// account and the full lens dimension list. An unset filter list yields a
/// single unfiltered request.
pub fn plan(
    config: &MetricConfig,
    snapshot: &MetadataSnapshot,
) -> Result<Vec<PlannedRequest>, PlanError> {
    if let Some(account) = &config.account {
        let accounts = snapshot
            .accounts
            .as_ref()
            .ok_or(PlanError::MetadataMissing(MetadataKind::Accounts))?;
        if !accounts.contains(account) {
            return Err(PlanError::UnknownAccount(account.clone()));
        }
    }

    let filters = resolve_filters(config, snapshot)?;
    let lens_dimensions = resolve_lens_dimensions(config, snapshot)?;

    let request = |filters: Vec<FilterRef>| PlannedRequest {
        metric: config.metric_parameter.clone(),
        account: config.account.clone(),
        filters,
        lens_dimensions: lens_dimensions.clone(),
        excluded_lens_dimensions: config.exclude_lens_dimensions.clone(),
    };

    if config.filters.is_unset() {
        return Ok(vec![request(Vec::new())]);
    }

    Ok(filters
        .chunks(config.max_filters_per_request.get())
        .map(|batch| request(batch.to_vec()))
        .collect())
}

fn resolve_filters(
    config: &MetricConfig,
    snapshot: &MetadataSnapshot,
) -> Result<Vec<FilterRef>, PlanError> {
    if config.filters.is_unset() {
        return Ok(Vec::new());
    }

    let cached = snapshot
        .filters
        .as_ref()
        .ok_or(PlanError::MetadataMissing(MetadataKind::Filters))?;

    let resolved = match &config.filters {
        Selection::Literal(names) => {
            let filters: Vec<FilterRef> = names
                .iter()
                .filter_map(|name| {
                    let filter = cached.by_name(name);
                    if filter.is_none() {
                        tracing::warn!(
                            metric = %config.metric_parameter,
                            filter = %name,
                            "configured filter does not exist, skipping"
                        );
                    }
                    filter
                })
                .collect();
            if filters.is_empty() {
                return Err(PlanError::UnknownNames {
                    kind: MetadataKind::Filters,
                    names: names.clone(),
                });
            }
            filters
        }
        // No exclusions apply to filters.
        Selection::All | Selection::AllExcept(_) => cached.all(),
    };

    Ok(resolved)
}

fn resolve_lens_dimensions(
    config: &MetricConfig,
    snapshot: &MetadataSnapshot,
) -> Result<Vec<LensDimension>, PlanError> {
    if !config.metric_parameter.is_lens() || config.lens_dimensions.is_unset() {
        return Ok(Vec::new());
    }

    let cached = snapshot
        .lens_dimensions
        .as_ref()
        .ok_or(PlanError::MetadataMissing(MetadataKind::LensDimensions))?;

    let (resolved, mut excluded): (Vec<LensDimension>, BTreeSet<String>) =
        match &config.lens_dimensions {
            Selection::Literal(names) => {
                let dimensions = names
                    .iter()
                    .filter_map(|name| {
                        let dimension = cached.get(name);
                        if dimension.is_none() {
                            tracing::warn!(
                                metric = %config.metric_parameter,
                                dimension = %name,
                                "configured metric lens dimension does not exist, skipping"
                            );
                        }
                        dimension
                    })
                    .collect::<Vec<_>>();
                // Sending no dimension ids would get the server's default set.
                if dimensions.is_empty() {
                    return Err(PlanError::UnknownNames {
                        kind: MetadataKind::LensDimensions,
                        names: names.clone(),
                    });
                }
                (dimensions, BTreeSet::new())
            }
            Selection::All => (cached.all(), BTreeSet::new()),
            Selection::AllExcept(except) => (cached.all(), except.clone()),
        };

    // Exclusions apply to the resolved list, never to the configured tokens.
    excluded.extend(config.exclude_lens_dimensions.iter().cloned());
    Ok(resolved
        .into_iter()
        .filter(|dimension| !excluded.contains(&dimension.name))
        .collect())
}
