//! Credentials must never show up in logs, errors or status output.

mod common;

use common::{collector, metric, PulseServer, PASSWORD, USERNAME};
use conviva_monitor::core::{MetadataKind, MonitorError};
use conviva_monitor::metadata::MetadataCache;
use conviva_monitor::monitoring::SystemHealth;
use conviva_monitor::upstream::UpstreamClient;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

/// Log output collected in memory
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("conviva_monitor=trace")
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

fn assert_no_credentials(text: &str) {
    assert!(!text.contains(PASSWORD), "password leaked in: {}", text);
    assert!(!text.contains(USERNAME), "username leaked in: {}", text);
}

async fn reject_everything(pulse: &PulseServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&pulse.server)
        .await;
}

#[tokio::test]
async fn test_rejected_credentials_do_not_leak_into_logs_or_status() {
    let (logs, _guard) = capture_logs();
    let pulse = PulseServer::start().await;
    reject_everything(&pulse).await;

    let config = pulse
        .config()
        .metric_configs(vec![
            metric("metricParameter: concurrent_plays"),
            metric("metricParameter: plays\nfilters: [_ALL_]"),
        ])
        .build()
        .unwrap();
    let (collector, _receiver) = collector(config);

    let report = collector.tick().await;
    assert_eq!(report.upstream_errors, 1);
    assert_eq!(report.auth_failures, 1);
    assert_eq!(report.metadata_failures, vec![MetadataKind::Filters]);

    let status = collector.status();
    assert_eq!(status.health, SystemHealth::Critical);

    let status_json = serde_json::to_string(&status).unwrap();
    assert_no_credentials(&status_json);
    assert_no_credentials(&format!("{:?}", status));
    assert_no_credentials(&format!("{:?}", collector.config()));

    let captured = logs.contents();
    assert!(captured.contains("401"), "expected the failure to be logged");
    assert_no_credentials(&captured);
}

#[tokio::test]
async fn test_upstream_errors_do_not_carry_credentials() {
    let pulse = PulseServer::start().await;
    reject_everything(&pulse).await;

    let config = pulse.config().build().unwrap();
    let client = Arc::new(UpstreamClient::from_config(&config).unwrap());

    let err = client.fetch("accounts.json", &[]).await.unwrap_err();
    assert!(err.is_auth_failure());
    assert_no_credentials(&err.to_string());
    assert_no_credentials(&format!("{:?}", err));

    let cache = MetadataCache::new(client, Duration::from_secs(60));
    let err = cache.get(MetadataKind::Accounts).await.unwrap_err();
    assert!(matches!(
        err,
        MonitorError::UpstreamUnavailable {
            kind: MetadataKind::Accounts,
            attempts: 3
        }
    ));
    assert_no_credentials(&err.to_string());
}

#[tokio::test]
async fn test_connection_failures_do_not_carry_credentials() {
    // Nothing listens on the discard port.
    let config = conviva_monitor::core::ConfigBuilder::new()
        .username(USERNAME)
        .password(PASSWORD)
        .api_url("http://127.0.0.1:9/insights/2.4/")
        .retry(conviva_monitor::core::RetryPolicy::fixed(1, Duration::from_millis(1)))
        .build()
        .unwrap();
    let client = UpstreamClient::from_config(&config).unwrap();

    let err = client.fetch("filters.json", &[]).await.unwrap_err();
    assert_no_credentials(&err.to_string());
    assert_no_credentials(&format!("{:?}", err));
}
