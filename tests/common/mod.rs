//! Common test utilities: a fake Pulse API on wiremock.

#![allow(dead_code)]

use conviva_monitor::collector::{ChannelSink, Collector};
use conviva_monitor::core::{ConfigBuilder, Datapoint, MetricConfig, RetryPolicy};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

pub const USERNAME: &str = "pulse-test-user";
pub const PASSWORD: &str = "pulse-test-password-9f2c";
pub const API_PATH: &str = "/insights/2.4";

/// A wiremock server answering like the Pulse API
pub struct PulseServer {
    pub server: MockServer,
}

impl PulseServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn api_url(&self) -> String {
        format!("{}{}/", self.server.uri(), API_PATH)
    }

    /// Builder pointed at this server with fast retries
    pub fn config(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .username(USERNAME)
            .password(PASSWORD)
            .api_url(self.api_url())
            .timeout(Duration::from_secs(5))
            .retry(RetryPolicy::fixed(3, Duration::from_millis(10)))
    }

    /// Mock for an API path that only matches authenticated calls
    pub fn endpoint(file: &str) -> wiremock::MockBuilder {
        Mock::given(method("GET"))
            .and(path(format!("{}/{}", API_PATH, file)))
            .and(basic_auth(USERNAME, PASSWORD))
    }

    pub async fn mount_filters(&self, filters: &[(&str, &str)]) {
        let body: serde_json::Map<String, Value> = filters
            .iter()
            .map(|(id, name)| (id.to_string(), json!(name)))
            .collect();
        Self::endpoint("filters.json")
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Object(body)))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_lens_dimensions(&self, dimensions: &[(&str, u64)]) {
        let body: serde_json::Map<String, Value> = dimensions
            .iter()
            .map(|(name, id)| (name.to_string(), json!(id)))
            .collect();
        Self::endpoint("metriclens_dimension_list.json")
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Object(body)))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_accounts(&self, accounts: &[(&str, &str)], default: &str) {
        let map: serde_json::Map<String, Value> = accounts
            .iter()
            .map(|(name, id)| (name.to_string(), json!(id)))
            .collect();
        Self::endpoint("accounts.json")
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "accounts": map, "default": default })),
            )
            .mount(&self.server)
            .await;
    }
}

/// Answers filtered simple-metric queries with one value per requested id.
///
/// The value of filter `n` is `n`, so tests can check which filters came back.
pub struct EchoFilters {
    pub metric: &'static str,
}

impl Respond for EchoFilters {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let ids = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "filter_ids")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        let filters: serde_json::Map<String, Value> = ids
            .split(',')
            .filter(|id| !id.is_empty())
            .map(|id| (id.to_string(), json!([id.parse::<f64>().unwrap_or(0.0)])))
            .collect();

        let mut body = serde_json::Map::new();
        body.insert(
            self.metric.to_string(),
            json!({ "type": "simple", "filters": filters }),
        );
        ResponseTemplate::new(200).set_body_json(Value::Object(body))
    }
}

pub fn metric(yaml: &str) -> MetricConfig {
    MetricConfig::from_yaml(yaml).unwrap()
}

/// Collector feeding a channel
pub fn collector(config: conviva_monitor::Config) -> (Collector, mpsc::Receiver<Datapoint>) {
    let (sink, receiver) = ChannelSink::channel(4096);
    let collector = Collector::from_config(config, Arc::new(sink)).unwrap();
    (collector, receiver)
}

/// Everything currently buffered in the channel
pub fn drain(receiver: &mut mpsc::Receiver<Datapoint>) -> Vec<Datapoint> {
    let mut datapoints = Vec::new();
    while let Ok(datapoint) = receiver.try_recv() {
        datapoints.push(datapoint);
    }
    datapoints
}
