//! Static client configuration.
//!
//! Built once at startup (usually deserialized by the embedding binary) and
//! validated before any instance is contacted.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    CLIENT_NAME, DEFAULT_BACKLOG_CAPACITY, DEFAULT_PENDING_CAPACITY, DEFAULT_RESUME_TIMEOUT_SECS,
    EVENT_CHANNEL_CAPACITY,
};

/// Connection parameters for one backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Unique name; used as the instance id in events and logs.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Credential sent in the `Authorization` header.
    pub password: String,
    /// Optional region tag matched against session region hints.
    #[serde(default)]
    pub region: Option<String>,
    /// Use `wss`/`https` instead of `ws`/`http`.
    #[serde(default)]
    pub secure: bool,
}

impl InstanceConfig {
    /// Creates a plain-text instance config without a region tag.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            password: password.into(),
            region: None,
            secure: false,
        }
    }

    /// Sets the region tag.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// URL of the persistent channel endpoint.
    pub fn channel_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Base URL for request/response calls.
    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("instance name must not be empty".to_string());
        }
        if self.host.trim().is_empty() {
            return Err(format!("instance '{}': host must not be empty", self.name));
        }
        if self.port == 0 {
            return Err(format!("instance '{}': port must be >= 1", self.name));
        }
        Ok(())
    }
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry (milliseconds).
    pub initial_ms: u64,
    /// Upper bound for any single delay (milliseconds).
    pub max_ms: u64,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction in `0.0..=1.0`.
    pub jitter: f64,
    /// Stop retrying after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_ms == 0 {
            return Err("backoff.initial_ms must be >= 1".to_string());
        }
        if self.max_ms < self.initial_ms {
            return Err("backoff.max_ms must be >= backoff.initial_ms".to_string());
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err("backoff.multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("backoff.jitter must be within 0.0..=1.0".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("backoff.max_attempts must be >= 1 when set".to_string());
        }
        Ok(())
    }
}

/// Top-level client configuration.
///
/// All fields except `user_id` have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Id of the user account the backend plays on behalf of.
    pub user_id: String,
    /// Value of the `Client-Name` handshake header.
    pub client_name: String,
    /// Instances registered at startup.
    pub instances: Vec<InstanceConfig>,
    pub backoff: BackoffConfig,
    /// Resume window offered to the backend (seconds). 0 disables resuming.
    pub resume_timeout_secs: u64,
    /// Play requests buffered per session while no instance is assigned.
    pub pending_capacity: usize,
    /// Commands queued per channel while it is resuming.
    pub backlog_capacity: usize,
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
    /// Region tag -> voice endpoint prefixes mapping to it.
    pub regions: BTreeMap<String, Vec<String>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            client_name: format!("{CLIENT_NAME}/{}", env!("CARGO_PKG_VERSION")),
            instances: Vec::new(),
            backoff: BackoffConfig::default(),
            resume_timeout_secs: DEFAULT_RESUME_TIMEOUT_SECS,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            regions: default_regions(),
        }
    }
}

impl ClientConfig {
    /// Resume window as a [`Duration`].
    pub fn resume_timeout(&self) -> Duration {
        Duration::from_secs(self.resume_timeout_secs)
    }

    /// Validates the configuration, returning an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("user_id must not be empty".to_string());
        }
        if self.pending_capacity == 0 {
            return Err("pending_capacity must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        self.backoff.validate()?;

        let mut seen = std::collections::HashSet::new();
        for instance in &self.instances {
            instance.validate()?;
            if !seen.insert(instance.name.as_str()) {
                return Err(format!("duplicate instance name '{}'", instance.name));
            }
        }
        Ok(())
    }
}

/// Voice endpoint prefixes grouped by broad region.
fn default_regions() -> BTreeMap<String, Vec<String>> {
    let mut regions = BTreeMap::new();
    regions.insert(
        "asia".to_string(),
        ["hongkong", "singapore", "sydney", "japan", "southafrica", "india"]
            .map(String::from)
            .to_vec(),
    );
    regions.insert(
        "eu".to_string(),
        ["eu", "amsterdam", "frankfurt", "russia", "london"]
            .map(String::from)
            .to_vec(),
    );
    regions.insert(
        "us".to_string(),
        ["us", "brazil"].map(String::from).to_vec(),
    );
    regions
}
