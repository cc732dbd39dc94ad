//! Protocol bridge timeouts and cache policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings consumed by the command dispatcher and its managers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// DISCOVER / FIND_* duration when the client gives none.
    pub default_scan_timeout_ms: u64,
    /// CONNECT deadline when the client gives none.
    pub default_connect_timeout_ms: u64,
    /// Upper bound for any client-supplied timeout.
    pub max_timeout_ms: u64,
    /// Ceiling on a single command; extended by the command's own timeout.
    pub request_timeout_ms: u64,
    /// Age after which a discovered peripheral drops out of the cache.
    pub cache_ttl_ms: u64,
    /// Idle time after which a per-device lane worker exits.
    pub lane_idle_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            default_scan_timeout_ms: 10_000,
            default_connect_timeout_ms: 10_000,
            max_timeout_ms: 120_000,
            request_timeout_ms: 60_000,
            cache_ttl_ms: 300_000,
            lane_idle_ms: 60_000,
        }
    }
}

impl BridgeSettings {
    /// Default bounded-scan duration.
    pub fn default_scan_timeout(&self) -> Duration {
        Duration::from_millis(self.default_scan_timeout_ms)
    }

    /// Default connect deadline.
    pub fn default_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.default_connect_timeout_ms)
    }

    /// Largest client-supplied timeout.
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    /// Per-command ceiling.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Discovery cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Lane worker idle timeout.
    pub fn lane_idle(&self) -> Duration {
        Duration::from_millis(self.lane_idle_ms)
    }
}
