//! `reqwest` transport for the Pulse API.
//!
//! Credentials are attached as a basic-auth header on every request and are
//! never part of the URL, so transport errors cannot echo them.

use crate::core::{Config, MonitorError, Result, Secret};
use crate::upstream::{RawResponse, Transport};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;

/// HTTP transport with basic auth
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    username: Secret,
    password: Secret,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for the configured API
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("conviva-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base: config.api_base()?,
            username: config.pulse_username.clone(),
            password: config.pulse_password.clone(),
            timeout: config.timeout,
        })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn transport_error(&self, err: reqwest::Error) -> MonitorError {
        if err.is_timeout() {
            MonitorError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RawResponse> {
        let url = self
            .base
            .join(path)
            .map_err(|e| MonitorError::config(format!("Invalid API path '{}': {}", path, e)))?;

        let response = self
            .client
            .get(url)
            .query(query)
            .basic_auth(self.username.expose(), Some(self.password.expose()))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        tracing::trace!(path, status, bytes = body.len(), "pulse api response");

        Ok(RawResponse { status, body })
    }
}
