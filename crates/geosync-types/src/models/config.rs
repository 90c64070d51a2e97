//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Full engine configuration.
///
/// Thresholds (TTL, capacity, retry counts, freshness window) are product
/// placeholders; the application shell is expected to set them from real
/// requirements rather than rely on the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the record service.
    pub endpoint: String,
    /// Maximum number of records kept in the local store.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Entry time-to-live in seconds; older entries are evicted.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How long a completed region sync counts as fresh, in seconds.
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
    /// Per-attempt fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Maximum fetch attempts per sync (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay between retries, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on the backoff delay, in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Region grid granularity in degrees.
    #[serde(default = "default_tile_size_deg")]
    pub tile_size_deg: f64,
    /// Interval for the background auto-refresh loop, in seconds.
    #[serde(default = "default_auto_refresh_secs")]
    pub auto_refresh_secs: u64,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_freshness_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_cap_ms() -> u64 {
    5_000
}

fn default_tile_size_deg() -> f64 {
    1.0
}

fn default_auto_refresh_secs() -> u64 {
    60
}

impl EngineConfig {
    /// Create a configuration with defaults for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
            freshness_secs: default_freshness_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            tile_size_deg: default_tile_size_deg(),
            auto_refresh_secs: default_auto_refresh_secs(),
        }
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn auto_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.auto_refresh_secs)
    }

    /// The eviction policy implied by this configuration.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy { max_entries: self.max_entries, ttl: Duration::from_secs(self.ttl_secs) }
    }
}

/// Capacity and age limits applied by the store's eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Keep at most this many records, dropping least-recently-fetched first.
    pub max_entries: usize,
    /// Drop records whose freshness timestamp is older than this.
    pub ttl: Duration,
}
