//! Periodic collection of Pulse metrics.
//!
//! Every tick walks the same phases: refresh the metadata the metric configs
//! need, plan the upstream calls, dispatch them with bounded concurrency, map
//! each response and emit its datapoints straight away. A failure in any one
//! call, config or metadata kind only costs the data that depends on it.

pub mod sink;

pub use sink::{ChannelSink, DatapointSink, JsonLinesSink, StdoutSink};

use crate::core::{Config, MetadataKind, MonitorError, OverrunPolicy, PlannedRequest, Result};
use crate::mapper;
use crate::metadata::{MetadataCache, MetadataSnapshot};
use crate::monitoring::{CollectorStats, CollectorStatus};
use crate::planner;
use crate::upstream::UpstreamClient;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one collection tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// When the tick started
    pub started_at: DateTime<Utc>,
    /// Wall time spent in the tick
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Metadata kinds that could not be refreshed
    pub metadata_failures: Vec<MetadataKind>,
    /// Metric configs that produced no requests
    pub skipped_configs: usize,
    /// Upstream calls planned
    pub requests_planned: usize,
    /// Upstream calls that finished, successfully or not
    pub requests_completed: usize,
    /// Upstream calls whose response was mapped and emitted
    pub requests_succeeded: usize,
    /// Upstream calls that failed after retries
    pub upstream_errors: usize,
    /// Upstream failures caused by rejected credentials
    pub auth_failures: usize,
    /// Responses that could not be mapped
    pub mapping_errors: usize,
    /// Datapoints handed to the sink
    pub datapoints: usize,
    /// Tick outlived its interval
    pub late: bool,
    /// Tick was abandoned at its deadline
    pub cancelled: bool,
    /// Sink stopped accepting datapoints
    pub sink_closed: bool,
}

impl TickReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ..Self::default()
        }
    }

    /// True when nothing went wrong
    pub fn is_clean(&self) -> bool {
        self.metadata_failures.is_empty()
            && self.skipped_configs == 0
            && self.upstream_errors == 0
            && self.mapping_errors == 0
            && !self.late
            && !self.cancelled
            && !self.sink_closed
    }
}

/// Polls the Pulse API and emits datapoints to a sink
pub struct Collector {
    config: Arc<Config>,
    client: Arc<UpstreamClient>,
    metadata: MetadataCache,
    sink: Arc<dyn DatapointSink>,
    stats: Arc<CollectorStats>,
}

impl Collector {
    /// Creates a collector on top of an existing client
    pub fn new(config: Config, client: Arc<UpstreamClient>, sink: Arc<dyn DatapointSink>) -> Self {
        let metadata = MetadataCache::new(client.clone(), config.metadata_refresh_interval);
        Self {
            config: Arc::new(config),
            client,
            metadata,
            sink,
            stats: Arc::new(CollectorStats::new()),
        }
    }

    /// Creates a collector talking HTTP to the configured API
    pub fn from_config(config: Config, sink: Arc<dyn DatapointSink>) -> Result<Self> {
        config.validate()?;
        let client = Arc::new(UpstreamClient::from_config(&config)?);
        Ok(Self::new(config, client, sink))
    }

    /// Effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metadata cache
    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<CollectorStats> {
        self.stats.clone()
    }

    /// Status snapshot with counters, health and redacted configuration
    pub fn status(&self) -> CollectorStatus {
        self.stats.status(&self.config)
    }

    /// Runs one tick to completion
    pub async fn tick(&self) -> TickReport {
        self.execute_tick(None).await
    }

    /// Runs ticks on the configured interval until `shutdown` resolves.
    ///
    /// Ticks run inline, so at most one is in flight; missed interval
    /// boundaries are skipped. Returns an error only when the sink closes.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let period = self.config.interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval_secs = period.as_secs(),
            metrics = self.config.metric_configs.len(),
            overrun_policy = ?self.config.overrun_policy,
            "Starting collector"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let deadline = match self.config.overrun_policy {
                        OverrunPolicy::Complete => None,
                        OverrunPolicy::Cancel => Some(period),
                    };
                    tokio::select! {
                        report = self.execute_tick(deadline) => {
                            if report.sink_closed {
                                return Err(MonitorError::SinkClosed);
                            }
                        }
                        _ = &mut shutdown => {
                            info!("Shutdown requested during tick, abandoning it");
                            break;
                        }
                    }
                }
            }
        }

        info!("Collector stopped");
        Ok(())
    }

    async fn execute_tick(&self, deadline: Option<Duration>) -> TickReport {
        let start = Instant::now();
        let mut report = TickReport::new();

        match deadline {
            Some(limit) => {
                if tokio::time::timeout(limit, self.collect(&mut report))
                    .await
                    .is_err()
                {
                    warn!(
                        deadline_ms = limit.as_millis() as u64,
                        completed = report.requests_completed,
                        planned = report.requests_planned,
                        "Tick exceeded its interval, outstanding requests cancelled"
                    );
                    report.cancelled = true;
                }
            }
            None => self.collect(&mut report).await,
        }

        report.duration = start.elapsed();
        let interval = self.config.interval();
        if !report.cancelled && report.duration > interval {
            warn!(
                duration_ms = report.duration.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "Tick overran its interval, skipping missed ticks"
            );
            report.late = true;
        }

        debug!(
            duration_ms = report.duration.as_millis() as u64,
            requests = report.requests_completed,
            datapoints = report.datapoints,
            "Tick finished"
        );
        self.stats.record_tick(&report);
        report
    }

    async fn collect(&self, report: &mut TickReport) {
        let snapshot = self.refresh_metadata(report).await;
        let requests = self.plan_requests(&snapshot, report);
        self.dispatch(&requests, report).await;
    }

    async fn refresh_metadata(&self, report: &mut TickReport) -> MetadataSnapshot {
        let kinds: BTreeSet<MetadataKind> = self
            .config
            .metric_configs
            .iter()
            .flat_map(planner::required_metadata)
            .collect();

        if kinds.is_empty() {
            return MetadataSnapshot::default();
        }

        debug!(phase = "refreshing_metadata", kinds = ?kinds, "Tick phase");
        let (snapshot, failures) = self.metadata.snapshot(&kinds).await;
        for (kind, err) in failures {
            warn!(%kind, error = %err, "Metadata unavailable, dependent metrics skipped this tick");
            self.stats.record_error(&err);
            report.metadata_failures.push(kind);
        }
        snapshot
    }

    fn plan_requests(
        &self,
        snapshot: &MetadataSnapshot,
        report: &mut TickReport,
    ) -> Vec<PlannedRequest> {
        debug!(phase = "planning", "Tick phase");
        let mut requests = Vec::new();

        for config in &self.config.metric_configs {
            match planner::plan(config, snapshot) {
                Ok(planned) => requests.extend(planned),
                Err(err) => {
                    warn!(metric = %config.metric_parameter, error = %err, "Skipping metric config");
                    self.stats.record_error(&err.into());
                    report.skipped_configs += 1;
                }
            }
        }

        report.requests_planned = requests.len();
        requests
    }

    async fn dispatch(&self, requests: &[PlannedRequest], report: &mut TickReport) {
        debug!(
            phase = "dispatching",
            requests = requests.len(),
            concurrency = self.config.max_concurrent_requests,
            "Tick phase"
        );

        let client = self.client.as_ref();
        let mut responses = stream::iter(requests)
            .map(|request| async move { (request, client.execute(request).await) })
            .buffer_unordered(self.config.max_concurrent_requests.max(1));

        while let Some((request, result)) = responses.next().await {
            report.requests_completed += 1;

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    warn!(%request, error = %err, "Metric query failed");
                    if err.is_auth_failure() {
                        report.auth_failures += 1;
                    }
                    self.stats.record_error(&err);
                    report.upstream_errors += 1;
                    continue;
                }
            };

            let datapoints = match mapper::map(&response, request) {
                Ok(datapoints) => datapoints,
                Err(err) => {
                    warn!(%request, error = %err, "Dropping unmappable response");
                    self.stats.record_error(&err.into());
                    report.mapping_errors += 1;
                    continue;
                }
            };

            let datapoints: Vec<_> = datapoints
                .into_iter()
                .map(|datapoint| datapoint.with_extra_dimensions(&self.config.extra_dimensions))
                .collect();
            let count = datapoints.len();

            if let Err(err) = self.sink.emit(datapoints).await {
                error!(error = %err, "Datapoint sink failed, stopping tick");
                self.stats.record_error(&err);
                report.sink_closed = true;
                return;
            }

            report.requests_succeeded += 1;
            report.datapoints += count;
        }
    }
}
