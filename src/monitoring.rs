//! Operational counters and health for the collector.
//!
//! The collector records every tick here. [`CollectorStats::status`] turns
//! the counters and the last tick into a serializable [`CollectorStatus`]
//! that is safe to print: the embedded configuration redacts credentials.

use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::collector::TickReport;
use crate::core::{Config, MonitorError};

/// Collector health, derived from the most recent tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    /// No tick has completed yet.
    Starting,
    /// Last tick finished without failures.
    Healthy,
    /// Last tick lost part of its data.
    Degraded,
    /// Last tick produced nothing it was asked for.
    Unhealthy,
    /// The API rejected the configured credentials.
    Critical,
}

impl SystemHealth {
    /// Get severity score (0-100).
    pub fn severity(&self) -> u8 {
        match self {
            SystemHealth::Starting | SystemHealth::Healthy => 0,
            SystemHealth::Degraded => 25,
            SystemHealth::Unhealthy => 75,
            SystemHealth::Critical => 100,
        }
    }

    /// Determine health from the last tick.
    pub fn from_tick(report: Option<&TickReport>) -> Self {
        let Some(report) = report else {
            return SystemHealth::Starting;
        };

        if report.auth_failures > 0 {
            return SystemHealth::Critical;
        }

        let nothing_collected = report.requests_succeeded == 0
            && (report.requests_planned > 0 || report.skipped_configs > 0);
        if report.cancelled || report.sink_closed || nothing_collected {
            return SystemHealth::Unhealthy;
        }

        if report.is_clean() {
            SystemHealth::Healthy
        } else {
            SystemHealth::Degraded
        }
    }
}

/// Point-in-time copy of the collector counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub requests: u64,
    pub upstream_errors: u64,
    pub mapping_errors: u64,
    pub metadata_failures: u64,
    pub skipped_configs: u64,
    pub datapoints: u64,
    pub late_ticks: u64,
    pub cancelled_ticks: u64,
}

/// Status report for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub health: SystemHealth,
    pub version: String,
    pub uptime_seconds: u64,
    pub counters: StatsSnapshot,
    /// Failures by [`MonitorError::category`].
    pub errors_by_category: BTreeMap<String, u64>,
    pub last_tick: Option<TickReport>,
    /// Effective configuration, credentials redacted.
    pub config: Config,
}

/// Counters shared by the collector and anything reporting on it.
#[derive(Debug)]
pub struct CollectorStats {
    ticks: AtomicU64,
    requests: AtomicU64,
    upstream_errors: AtomicU64,
    mapping_errors: AtomicU64,
    metadata_failures: AtomicU64,
    skipped_configs: AtomicU64,
    datapoints: AtomicU64,
    late_ticks: AtomicU64,
    cancelled_ticks: AtomicU64,
    categories: Mutex<BTreeMap<String, u64>>,
    last_tick: ArcSwapOption<TickReport>,
    started: Instant,
}

impl Default for CollectorStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            mapping_errors: AtomicU64::new(0),
            metadata_failures: AtomicU64::new(0),
            skipped_configs: AtomicU64::new(0),
            datapoints: AtomicU64::new(0),
            late_ticks: AtomicU64::new(0),
            cancelled_ticks: AtomicU64::new(0),
            categories: Mutex::new(BTreeMap::new()),
            last_tick: ArcSwapOption::empty(),
            started: Instant::now(),
        }
    }

    /// Count an error under its category.
    pub fn record_error(&self, error: &MonitorError) {
        let mut categories = self
            .categories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *categories.entry(error.category().to_string()).or_insert(0) += 1;
    }

    /// Fold a finished tick into the counters.
    pub fn record_tick(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.requests
            .fetch_add(report.requests_completed as u64, Ordering::Relaxed);
        self.upstream_errors
            .fetch_add(report.upstream_errors as u64, Ordering::Relaxed);
        self.mapping_errors
            .fetch_add(report.mapping_errors as u64, Ordering::Relaxed);
        self.metadata_failures
            .fetch_add(report.metadata_failures.len() as u64, Ordering::Relaxed);
        self.skipped_configs
            .fetch_add(report.skipped_configs as u64, Ordering::Relaxed);
        self.datapoints
            .fetch_add(report.datapoints as u64, Ordering::Relaxed);
        if report.late {
            self.late_ticks.fetch_add(1, Ordering::Relaxed);
        }
        if report.cancelled {
            self.cancelled_ticks.fetch_add(1, Ordering::Relaxed);
        }
        self.last_tick.store(Some(Arc::new(report.clone())));
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            mapping_errors: self.mapping_errors.load(Ordering::Relaxed),
            metadata_failures: self.metadata_failures.load(Ordering::Relaxed),
            skipped_configs: self.skipped_configs.load(Ordering::Relaxed),
            datapoints: self.datapoints.load(Ordering::Relaxed),
            late_ticks: self.late_ticks.load(Ordering::Relaxed),
            cancelled_ticks: self.cancelled_ticks.load(Ordering::Relaxed),
        }
    }

    /// Error counts by category.
    pub fn errors_by_category(&self) -> BTreeMap<String, u64> {
        self.categories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Most recent tick, if any.
    pub fn last_tick(&self) -> Option<Arc<TickReport>> {
        self.last_tick.load_full()
    }

    /// Current health.
    pub fn health(&self) -> SystemHealth {
        SystemHealth::from_tick(self.last_tick().as_deref())
    }

    /// Build a status report for the given configuration.
    pub fn status(&self, config: &Config) -> CollectorStatus {
        let last_tick = self.last_tick();
        CollectorStatus {
            health: SystemHealth::from_tick(last_tick.as_deref()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            counters: self.snapshot(),
            errors_by_category: self.errors_by_category(),
            last_tick: last_tick.map(|report| report.as_ref().clone()),
            config: config.clone(),
        }
    }
}
