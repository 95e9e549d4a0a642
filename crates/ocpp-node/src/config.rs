//! Node configuration from the environment.

use anyhow::{Context, Result};
use ocpp_exchange::config::duration_serde::parse_duration;
use ocpp_exchange::{ExchangeConfig, ResultSelection};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Log filter directive (`info`, `ocpp_exchange=debug`, ...)
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Load from environment variables.
    ///
    /// - `OCPP_LOG_LEVEL` or `RUST_LOG`: log filter (default: info)
    /// - `OCPP_JSON_LOGS`: JSON output (default: false)
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            log_level: var("OCPP_LOG_LEVEL")
                .or_else(|| var("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),
            json_logs: var("OCPP_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Everything the node binary needs.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Exchange engine configuration
    pub exchange: ExchangeConfig,
    /// Logging configuration
    pub telemetry: TelemetryConfig,
    /// How often the demo request is sent
    pub demo_interval: Duration,
}

impl NodeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup, then validate.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut exchange = match var("OCPP_CONFIG") {
            Some(path) => load_file(Path::new(&path))?,
            None => ExchangeConfig::default(),
        };

        if let Some(node_id) = var("OCPP_NODE_ID") {
            exchange.node_id = node_id;
        }
        if exchange.node_id.is_empty() {
            exchange.node_id = "CSMS".to_string();
        }
        if let Some(timeout) = var("OCPP_DEFAULT_TIMEOUT") {
            exchange.default_timeout = duration_var("OCPP_DEFAULT_TIMEOUT", &timeout)?;
        }
        if let Some(interval) = var("OCPP_SWEEP_INTERVAL") {
            exchange.sweep_interval = duration_var("OCPP_SWEEP_INTERVAL", &interval)?;
        }
        if let Some(selection) = var("OCPP_RESULT_SELECTION") {
            exchange.result_selection = match selection.as_str() {
                "FirstRegistered" => ResultSelection::FirstRegistered,
                "FirstPresent" => ResultSelection::FirstPresent,
                other => anyhow::bail!("OCPP_RESULT_SELECTION: unknown policy {other:?}"),
            };
        }

        let demo_interval = match var("OCPP_DEMO_INTERVAL") {
            Some(interval) => duration_var("OCPP_DEMO_INTERVAL", &interval)?,
            None => Duration::from_secs(10),
        };

        exchange
            .validate()
            .context("Invalid exchange configuration")?;

        Ok(Self {
            exchange,
            telemetry: TelemetryConfig::from_vars(&var),
            demo_interval,
        })
    }
}

fn load_file(path: &Path) -> Result<ExchangeConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

fn duration_var(name: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| anyhow::anyhow!("{name}: {e} ({value:?})"))
}
