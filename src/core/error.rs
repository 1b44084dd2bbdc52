use crate::core::types::MetadataKind;
use thiserror::Error;

/// Errors raised by the collection core.
///
/// None of the variants carry credential material. Upstream failures record
/// the request path and status only, never the URL with userinfo or the
/// authorization header.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata unavailable: {kind} could not be fetched after {attempts} attempts")]
    UpstreamUnavailable { kind: MetadataKind, attempts: u32 },

    #[error("Metadata unreadable: {kind} response could not be decoded: {source}")]
    MetadataDecode {
        kind: MetadataKind,
        source: serde_json::Error,
    },

    #[error("Upstream request to {path} failed with status {status}")]
    Upstream { path: String, status: u16 },

    #[error("Upstream request to {path} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        last: Box<MonitorError>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Datapoint sink closed")]
    SinkClosed,
}

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new mapping error
    pub fn mapping<S: Into<String>>(msg: S) -> Self {
        Self::Mapping(msg.into())
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Any non-2xx status is retried, including authentication failures.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Upstream { .. } | Self::Network(_) | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// HTTP status of the failed upstream call, looking through retries
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.upstream_status(),
            _ => None,
        }
    }

    /// True when the API rejected the configured credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.upstream_status(), Some(401) | Some(403))
    }

    /// Returns the error category for counters and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::UpstreamUnavailable { .. } | Self::MetadataDecode { .. } => "metadata",
            Self::Upstream { .. } | Self::RetriesExhausted { .. } | Self::Network(_) => "upstream",
            Self::Timeout { .. } => "timeout",
            Self::Mapping(_) => "mapping",
            Self::Planning(_) => "planning",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::SinkClosed => "sink",
        }
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        // Drop the URL: it is not needed to diagnose transport failures.
        Self::Network(err.without_url().to_string())
    }
}
