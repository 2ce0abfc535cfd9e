//! Explicit sync configuration (§4.8): timeouts, high-latency threshold, and
//! page size, with documented production defaults.

use std::time::Duration;

/// Tunables for the sync controller. Production code uses [`SyncConfig::default`];
/// tests override individual fields to avoid waiting on real timers.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Soft timeout: past this, emit `HighLatencySync` without aborting the request.
    pub high_latency_threshold: Duration,
    /// Hard timeout: past this, cancel the outbound request and surface `SyncFailed`.
    pub hard_timeout: Duration,
    /// Maximum dirty items uploaded in one request page.
    pub max_items_per_page: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            high_latency_threshold: Duration::from_secs(8),
            hard_timeout: Duration::from_secs(60),
            max_items_per_page: 150,
        }
    }
}
