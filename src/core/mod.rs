//! Core types shared by every stage of the collection pipeline.
//!
//! This module contains configuration, errors, the retry policy and the
//! domain types passed between the planner, the upstream client and the
//! mapper.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod retry;
pub mod secret;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, MetricConfig, OverrunPolicy};
pub use error::{MonitorError, Result};
pub use retry::{Clock, RetryPolicy, TokioClock};
pub use secret::Secret;
pub use types::{
    sanitize, Datapoint, FilterRef, LensDimension, MetadataKind, MetricParameter, PlannedRequest,
    Selection,
};
