//! Conviva monitor - periodic collector for the Conviva Pulse analytics API.
//!
//! The monitor polls Pulse on a fixed interval and turns the returned
//! metrics, including metric lens breakdowns, into dimensioned datapoints.
//!
//! # Features
//!
//! - **Metadata Cache**: accounts, filters and lens dimensions fetched lazily
//!   and refreshed once stale
//! - **Request Planning**: `_ALL_` expansion, exclusions and filter batching
//! - **Bounded Concurrency**: upstream calls dispatched with a fixed limit and
//!   retried with a bounded policy
//! - **Credential Safety**: credentials never reach logs, errors or status
//!
//! # Architecture
//!
//! - `core`: configuration, errors, retry policy and domain types
//! - `metadata`: the metadata cache
//! - `planner`: metric config to upstream call expansion
//! - `upstream`: HTTP transport and retrying client
//! - `mapper`: response to datapoint conversion
//! - `collector`: the tick loop and datapoint sinks
//! - `monitoring`: counters, health and status
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use conviva_monitor::collector::{ChannelSink, Collector};
//! use conviva_monitor::core::ConfigBuilder;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::new()
//!         .username("pulse-user")
//!         .password("pulse-password")
//!         .build()?;
//!     let (sink, mut datapoints) = ChannelSink::channel(1024);
//!     let collector = Collector::from_config(config, Arc::new(sink))?;
//!
//!     let report = collector.tick().await;
//!     println!("{} datapoints", report.datapoints);
//!     while let Ok(datapoint) = datapoints.try_recv() {
//!         println!("{} = {}", datapoint.metric, datapoint.value);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod collector;
pub mod core;
pub mod mapper;
pub mod metadata;
pub mod monitoring;
pub mod planner;
pub mod upstream;

// Re-export core types for convenience
pub use crate::core::{Config, Result};
