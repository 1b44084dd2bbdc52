//! Cache for slowly changing Pulse reference data.
//!
//! Accounts, filters and metric lens dimensions are fetched lazily, kept for
//! the configured staleness window and handed out as immutable snapshots.
//! Readers never block: entries live in [`ArcSwapOption`] slots. Refreshes
//! are serialized by one async mutex so concurrent misses cause a single
//! upstream call.

use crate::core::{FilterRef, LensDimension, MetadataKind, MonitorError, Result};
use crate::upstream::UpstreamClient;
use arc_swap::ArcSwapOption;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Accounts visible to the configured credentials
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Accounts {
    /// Account name to account id
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
    /// Name of the account used when a query names none
    #[serde(default)]
    pub default: Option<String>,
}

impl Accounts {
    /// True if an account with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.accounts.contains_key(name)
    }
}

/// Server-side filters, keyed by id
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Filters {
    /// Filter id to filter name
    pub by_id: BTreeMap<String, String>,
}

impl Filters {
    /// Every filter, ordered by name then id
    pub fn all(&self) -> Vec<FilterRef> {
        let mut filters: Vec<FilterRef> = self
            .by_id
            .iter()
            .map(|(id, name)| FilterRef {
                id: id.clone(),
                name: name.clone(),
            })
            .collect();
        filters.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        filters
    }

    /// Looks up a filter by name
    pub fn by_name(&self, name: &str) -> Option<FilterRef> {
        self.by_id
            .iter()
            .find(|(_, filter_name)| filter_name.as_str() == name)
            .map(|(id, name)| FilterRef {
                id: id.clone(),
                name: name.clone(),
            })
    }

    /// Set of filter names
    pub fn names(&self) -> BTreeSet<String> {
        self.by_id.values().cloned().collect()
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when the account has no filters
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Metric lens dimensions, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct LensDimensions {
    /// Dimension name to numeric dimension id
    pub by_name: BTreeMap<String, u64>,
}

impl LensDimensions {
    /// Every dimension, ordered by name
    pub fn all(&self) -> Vec<LensDimension> {
        self.by_name
            .iter()
            .map(|(name, id)| LensDimension {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }

    /// Looks up a dimension by name
    pub fn get(&self, name: &str) -> Option<LensDimension> {
        self.by_name.get(name).map(|id| LensDimension {
            id: *id,
            name: name.to_string(),
        })
    }

    /// Number of dimensions
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True when no dimensions exist
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// One kind of cached metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    /// Result of `accounts.json`
    Accounts(Arc<Accounts>),
    /// Result of `filters.json`
    Filters(Arc<Filters>),
    /// Result of `metriclens_dimension_list.json`
    LensDimensions(Arc<LensDimensions>),
}

/// Immutable view of the metadata a tick plans against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSnapshot {
    /// Accounts, if fetched
    pub accounts: Option<Arc<Accounts>>,
    /// Filters, if fetched
    pub filters: Option<Arc<Filters>>,
    /// Lens dimensions, if fetched
    pub lens_dimensions: Option<Arc<LensDimensions>>,
}

impl MetadataSnapshot {
    /// True if `kind` is available
    pub fn has(&self, kind: MetadataKind) -> bool {
        match kind {
            MetadataKind::Accounts => self.accounts.is_some(),
            MetadataKind::Filters => self.filters.is_some(),
            MetadataKind::LensDimensions => self.lens_dimensions.is_some(),
        }
    }

    fn insert(&mut self, metadata: Metadata) {
        match metadata {
            Metadata::Accounts(accounts) => self.accounts = Some(accounts),
            Metadata::Filters(filters) => self.filters = Some(filters),
            Metadata::LensDimensions(dimensions) => self.lens_dimensions = Some(dimensions),
        }
    }
}

struct Entry {
    metadata: Metadata,
    fetched_at: Instant,
}

/// Lazily populated, staleness-bounded metadata cache
pub struct MetadataCache {
    client: Arc<UpstreamClient>,
    staleness: Duration,
    accounts: ArcSwapOption<Entry>,
    filters: ArcSwapOption<Entry>,
    lens_dimensions: ArcSwapOption<Entry>,
    refresh_lock: Mutex<()>,
}

impl MetadataCache {
    /// Creates an empty cache
    pub fn new(client: Arc<UpstreamClient>, staleness: Duration) -> Self {
        Self {
            client,
            staleness,
            accounts: ArcSwapOption::empty(),
            filters: ArcSwapOption::empty(),
            lens_dimensions: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    fn slot(&self, kind: MetadataKind) -> &ArcSwapOption<Entry> {
        match kind {
            MetadataKind::Accounts => &self.accounts,
            MetadataKind::Filters => &self.filters,
            MetadataKind::LensDimensions => &self.lens_dimensions,
        }
    }

    fn fresh(&self, kind: MetadataKind) -> Option<Metadata> {
        self.slot(kind)
            .load_full()
            .filter(|entry| entry.fetched_at.elapsed() < self.staleness)
            .map(|entry| entry.metadata.clone())
    }

    /// True if `kind` is cached and not stale
    pub fn is_fresh(&self, kind: MetadataKind) -> bool {
        self.fresh(kind).is_some()
    }

    /// Returns `kind`, fetching it when missing or stale.
    ///
    /// A failed refresh clears nothing but serves nothing either: the caller
    /// gets [`MonitorError::UpstreamUnavailable`] and the stale entry is
    /// retried on the next call.
    pub async fn get(&self, kind: MetadataKind) -> Result<Metadata> {
        if let Some(metadata) = self.fresh(kind) {
            return Ok(metadata);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(metadata) = self.fresh(kind) {
            return Ok(metadata);
        }

        let metadata = match self.fetch(kind).await {
            Ok(metadata) => metadata,
            Err(MonitorError::Serialization(source)) => {
                tracing::warn!(%kind, error = %source, "metadata response could not be decoded");
                return Err(MonitorError::MetadataDecode { kind, source });
            }
            Err(err) => {
                let attempts = match &err {
                    MonitorError::RetriesExhausted { attempts, .. } => *attempts,
                    _ => 1,
                };
                tracing::warn!(%kind, error = %err, "metadata refresh failed");
                return Err(MonitorError::UpstreamUnavailable { kind, attempts });
            }
        };

        self.slot(kind).store(Some(Arc::new(Entry {
            metadata: metadata.clone(),
            fetched_at: Instant::now(),
        })));
        tracing::debug!(%kind, "metadata refreshed");

        Ok(metadata)
    }

    async fn fetch(&self, kind: MetadataKind) -> Result<Metadata> {
        let response = self.client.fetch(kind.path(), &[]).await?;
        let metadata = match kind {
            MetadataKind::Accounts => Metadata::Accounts(Arc::new(response.json()?)),
            MetadataKind::Filters => Metadata::Filters(Arc::new(response.json()?)),
            MetadataKind::LensDimensions => Metadata::LensDimensions(Arc::new(response.json()?)),
        };
        Ok(metadata)
    }

    /// Resolves several kinds into one snapshot.
    ///
    /// Kinds that could not be fetched are missing from the snapshot and
    /// reported alongside it.
    pub async fn snapshot(
        &self,
        kinds: &BTreeSet<MetadataKind>,
    ) -> (MetadataSnapshot, Vec<(MetadataKind, MonitorError)>) {
        let mut snapshot = MetadataSnapshot::default();
        let mut failures = Vec::new();

        for kind in kinds {
            match self.get(*kind).await {
                Ok(metadata) => snapshot.insert(metadata),
                Err(err) => failures.push((*kind, err)),
            }
        }

        (snapshot, failures)
    }

    /// Drops every cached entry
    pub fn invalidate(&self) {
        for kind in MetadataKind::ALL {
            self.slot(kind).store(None);
        }
    }
}
