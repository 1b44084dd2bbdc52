//! Command-line interface for the Conviva monitor.
//!
//! Run `conviva-monitor` with a config file (or credentials in the
//! environment) to poll Pulse and print datapoints as JSON lines on stdout.
//! Logs go to stderr.

use crate::collector::{Collector, StdoutSink};
use crate::core::config::ConfigBuilder;
use crate::core::{Config, MonitorError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Polls the Conviva Pulse API and emits metric datapoints
#[derive(Parser, Debug)]
#[command(name = "conviva-monitor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/conviva-monitor/config.yaml)
    #[arg(short, long, env = "CONVIVA_MONITOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pulse API username
    #[arg(long, env = "CONVIVA_PULSE_USERNAME", hide_env_values = true)]
    pub username: Option<String>,

    /// Pulse API password
    #[arg(long, env = "CONVIVA_PULSE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Pulse API base URL
    #[arg(long, env = "CONVIVA_PULSE_API_URL")]
    pub api_url: Option<String>,

    /// Run a single collection tick and exit
    #[arg(long)]
    pub once: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Enable debug logging
    #[arg(short, long, env = "CONVIVA_MONITOR_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "CONVIVA_MONITOR_JSON_LOGS")]
    pub json_logs: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Default config file location
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("conviva-monitor").join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/conviva-monitor/config.yaml"))
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let builder = ConfigBuilder::new();

        let builder = match &self.config {
            // An explicit path must exist.
            Some(path) => {
                let builder = builder.from_file(path).await?;
                tracing::info!(path = %path.display(), "Loaded configuration");
                builder
            }
            None => {
                let path = Self::default_config_path();
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    let builder = builder.from_file(&path).await?;
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    builder
                } else {
                    tracing::debug!(path = %path.display(), "No config file found, using defaults");
                    builder
                }
            }
        };

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(username) = &self.username {
            builder = builder.username(username.as_str());
        }
        if let Some(password) = &self.password {
            builder = builder.password(password.as_str());
        }
        if let Some(url) = &self.api_url {
            builder = builder.api_url(url.as_str());
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging to stderr.
    pub fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level =
            std::env::var("CONVIVA_MONITOR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if self.json_logs {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init()
        };

        result.map_err(|e| MonitorError::config(format!("Failed to initialize logging: {}", e)))
    }
}

/// Execute the monitor.
pub async fn execute(cli: Cli) -> Result<()> {
    cli.init_logging()?;

    let config = cli.load_config().await?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  API URL: {}", config.api_base()?);
        println!("  Interval: {}s", config.interval_seconds);
        println!("  Overrun policy: {:?}", config.overrun_policy);
        println!("  Metric configs: {}", config.metric_configs.len());
        for metric in &config.metric_configs {
            println!("    - {}", metric.metric_parameter);
        }
        return Ok(());
    }

    let collector = Collector::from_config(config, Arc::new(StdoutSink::stdout()))?;

    if cli.once {
        let report = collector.tick().await;
        tracing::info!(
            datapoints = report.datapoints,
            requests = report.requests_completed,
            clean = report.is_clean(),
            health = ?collector.stats().health(),
            "Single tick finished"
        );
        return Ok(());
    }

    collector.run(shutdown_signal()).await?;

    let status = collector.status();
    tracing::info!(
        health = ?status.health,
        ticks = status.counters.ticks,
        datapoints = status.counters.datapoints,
        "Final collector status"
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Received shutdown signal, stopping...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["conviva-monitor"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_cli_flags() {
        let cli = cli(&["--once", "-d", "--username", "u", "--password", "p"]);

        assert!(cli.once);
        assert!(cli.debug);
        assert!(!cli.check_config);
        assert_eq!(cli.username.as_deref(), Some("u"));
    }

    #[tokio::test]
    async fn test_cli_arguments_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "pulseUsername: file-user\npulsePassword: file-pass\nintervalSeconds: 30"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = cli(&["-c", &path, "--password", "cli-pass"]);
        let config = cli.load_config().await.unwrap();

        assert_eq!(config.pulse_username.expose(), "file-user");
        assert_eq!(config.pulse_password.expose(), "cli-pass");
        assert_eq!(config.interval_seconds, 30);
    }

    #[tokio::test]
    async fn test_missing_explicit_config_file_is_an_error() {
        let cli = cli(&["-c", "/nonexistent/conviva-monitor.yaml"]);
        let err = cli.load_config().await.unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
