//! Monitor configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use lavaclient_core::protocol_constants::DEFAULT_RESUME_TIMEOUT_SECS;
use lavaclient_core::{BackoffConfig, ClientConfig, InstanceConfig};
use serde::Deserialize;

/// Monitor configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Bot user id presented to every instance.
    /// Override: `LAVACLIENT_USER_ID` (via CLI)
    pub user_id: String,

    /// Client name header; defaults to `lavaclient/<version>`.
    pub client_name: Option<String>,

    pub instances: Vec<InstanceConfig>,

    pub backoff: BackoffConfig,

    /// How long an instance keeps our sessions after a disconnect (0 disables
    /// resuming).
    /// Override: `LAVACLIENT_RESUME_TIMEOUT`
    pub resume_timeout_secs: u64,

    /// Seconds between instance summaries in the log (0 disables them).
    /// Override: `LAVACLIENT_REPORT_INTERVAL`
    pub report_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            client_name: None,
            instances: Vec::new(),
            backoff: BackoffConfig::default(),
            resume_timeout_secs: DEFAULT_RESUME_TIMEOUT_SECS,
            report_interval_secs: 30,
        }
    }
}

impl MonitorConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(lookup);
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = lookup("LAVACLIENT_RESUME_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.resume_timeout_secs = secs;
        }

        if let Some(secs) = lookup("LAVACLIENT_REPORT_INTERVAL").and_then(|v| v.parse().ok()) {
            self.report_interval_secs = secs;
        }

        // Note: LAVACLIENT_USER_ID is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to lavaclient-core's config type.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            user_id: self.user_id.clone(),
            instances: self.instances.clone(),
            backoff: self.backoff.clone(),
            resume_timeout_secs: self.resume_timeout_secs,
            ..Default::default()
        };
        if let Some(name) = &self.client_name {
            config.client_name = name.clone();
        }
        config
    }
}
