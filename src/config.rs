//! Dashboard configuration.
//!
//! Loaded from YAML; every field has a default so a file only needs the
//! values it changes:
//!
//! ```yaml
//! endpoint: https://guac.example.com
//! refresh: high          # low | medium | high | <milliseconds>
//! show_inactive: false
//! fetch:
//!   timeout_ms: 8000
//!   max_retries: 2
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::source::http::{snapshot_url, DEFAULT_SNAPSHOT_PATH};
use crate::source::retry::{RetryPolicy, DEFAULT_RETRY_PAUSE, DEFAULT_TIMEOUT_INCREMENT};
use crate::topology::DEFAULT_ROOT_ID;

/// Low cadence preset (ms)
pub const LOW_INTERVAL_MS: u64 = 30_000;
/// Medium cadence preset (ms)
pub const MEDIUM_INTERVAL_MS: u64 = 10_000;
/// High cadence preset (ms)
pub const HIGH_INTERVAL_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// RefreshRate
// ---------------------------------------------------------------------------

/// Polling cadence: a named preset or an explicit interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RefreshRateRepr", into = "String")]
pub enum RefreshRate {
    Low,
    #[default]
    Medium,
    High,
    Custom { interval_ms: u64 },
}

impl RefreshRate {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms())
    }

    pub fn interval_ms(&self) -> u64 {
        match self {
            RefreshRate::Low => LOW_INTERVAL_MS,
            RefreshRate::Medium => MEDIUM_INTERVAL_MS,
            RefreshRate::High => HIGH_INTERVAL_MS,
            RefreshRate::Custom { interval_ms } => *interval_ms,
        }
    }
}

impl FromStr for RefreshRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RefreshRate::Low),
            "medium" => Ok(RefreshRate::Medium),
            "high" => Ok(RefreshRate::High),
            other => other
                .parse::<u64>()
                .map(|interval_ms| RefreshRate::Custom { interval_ms })
                .map_err(|_| ConfigError::UnknownRefreshRate(s.to_string())),
        }
    }
}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshRate::Low => f.write_str("low"),
            RefreshRate::Medium => f.write_str("medium"),
            RefreshRate::High => f.write_str("high"),
            RefreshRate::Custom { interval_ms } => write!(f, "{}", interval_ms),
        }
    }
}

impl From<RefreshRate> for String {
    fn from(rate: RefreshRate) -> Self {
        rate.to_string()
    }
}

/// YAML accepts either a preset name or a bare number of milliseconds
#[derive(Deserialize)]
#[serde(untagged)]
enum RefreshRateRepr {
    Millis(u64),
    Named(String),
}

impl TryFrom<RefreshRateRepr> for RefreshRate {
    type Error = ConfigError;

    fn try_from(repr: RefreshRateRepr) -> Result<Self, Self::Error> {
        match repr {
            RefreshRateRepr::Millis(interval_ms) => Ok(RefreshRate::Custom { interval_ms }),
            RefreshRateRepr::Named(name) => name.parse(),
        }
    }
}

// ---------------------------------------------------------------------------
// FetchConfig
// ---------------------------------------------------------------------------

/// Per-fetch timeout and retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Timeout of the first attempt (milliseconds)
    pub timeout_ms: u64,

    /// Retries after the first attempt (at most 5)
    pub max_retries: u32,

    /// Added to the timeout after each timed-out attempt (milliseconds)
    pub timeout_increment_ms: u64,

    /// Pause between attempts (milliseconds)
    pub retry_pause_ms: u64,

    /// Retry payloads that fail validation
    pub retry_data_failures: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
            timeout_increment_ms: DEFAULT_TIMEOUT_INCREMENT.as_millis() as u64,
            retry_pause_ms: DEFAULT_RETRY_PAUSE.as_millis() as u64,
            retry_data_failures: false,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            timeout_increment: Duration::from_millis(self.timeout_increment_ms),
            retry_pause: Duration::from_millis(self.retry_pause_ms),
            retry_data_failures: self.retry_data_failures,
        }
    }
}

// ---------------------------------------------------------------------------
// DashboardConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL of the backend
    pub endpoint: String,

    /// Path of the snapshot endpoint under `endpoint`
    pub snapshot_path: String,

    pub refresh: RefreshRate,

    pub fetch: FetchConfig,

    /// When false, inactive leaves are filtered out before reconciliation
    pub show_inactive: bool,

    /// Identifier of the root group
    pub root_id: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            snapshot_path: DEFAULT_SNAPSHOT_PATH.to_string(),
            refresh: RefreshRate::default(),
            fetch: FetchConfig::default(),
            show_inactive: true,
            root_id: DEFAULT_ROOT_ID.to_string(),
        }
    }
}

impl DashboardConfig {
    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: DashboardConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Check everything that can be checked before the first fetch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.interval_ms() == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        self.fetch.retry_policy().validate()?;
        snapshot_url(&self.endpoint, &self.snapshot_path)?;
        Ok(())
    }

    /// Builder: set the endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Builder: set the refresh rate
    pub fn refresh(mut self, refresh: RefreshRate) -> Self {
        self.refresh = refresh;
        self
    }

    /// Builder: show or hide inactive connections
    pub fn show_inactive(mut self, show: bool) -> Self {
        self.show_inactive = show;
        self
    }

    /// Builder: set the fetch settings
    pub fn fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }
}
