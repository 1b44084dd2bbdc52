//! Client for the Pulse analytics API.
//!
//! The [`Transport`] trait is the request/response contract the collection
//! core needs from HTTP; [`HttpTransport`] implements it with `reqwest`.
//! [`UpstreamClient`] layers the retry policy and status handling on top.

pub mod http;

pub use http::HttpTransport;

use crate::core::{Clock, Config, MonitorError, PlannedRequest, Result, RetryPolicy, TokioClock};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Status and body of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl RawResponse {
    /// Creates a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// A single GET against the API, with credentials applied by the implementor
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches `path` (relative to the API base) with the given query pairs
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse>;
}

/// Issues API calls with bounded retry.
///
/// Holds no mutable state; one instance is shared by every concurrent call
/// of a tick.
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl UpstreamClient {
    /// Creates a client sleeping on the tokio timer between attempts
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            clock: Arc::new(TokioClock),
        }
    }

    /// Creates a client talking HTTP to the configured API
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config.retry.clone()))
    }

    /// Replaces the clock used between attempts
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// GETs `path`, retrying on transport errors and non-2xx statuses
    pub async fn fetch(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let transport = self.transport.as_ref();
        self.retry
            .run(self.clock.as_ref(), path, move || async move {
                let response = transport.get(path, query).await?;
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(MonitorError::Upstream {
                        path: path.to_string(),
                        status: response.status,
                    })
                }
            })
            .await
    }

    /// Issues the metric query for one planned request
    pub async fn execute(&self, request: &PlannedRequest) -> Result<RawResponse> {
        let query = request.query();
        tracing::trace!(%request, "querying metric");
        self.fetch(PlannedRequest::PATH, &query).await
    }
}
