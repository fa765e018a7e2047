//! Configuration for the collector.
//!
//! # Example
//!
//! ```
//! use webhook_sync::CollectorConfig;
//!
//! // Minimal config (uses defaults)
//! let config = CollectorConfig::default();
//! assert_eq!(config.max_batch_size, 100);
//!
//! // Full config
//! let config = CollectorConfig {
//!     max_batch_size: 500,
//!     flush_interval_ms: 10_000,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the collector.
///
/// All fields have defaults matching a one-minute batching cadence and a
/// five-minute reconciliation lookback.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Records held before a size-triggered flush (default: 100)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Periodic flush interval in milliseconds (default: 60 000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Clock-skew tolerance for cross-node diffing, in seconds (default: 60)
    #[serde(default = "default_skew_tolerance_secs")]
    pub skew_tolerance_secs: u32,

    /// How far back the reconciliation window starts, in seconds (default: 300)
    #[serde(default = "default_sync_lookback_secs")]
    pub sync_lookback_secs: u32,

    /// How far behind "now" the window ends, leaving in-flight batches out of
    /// scope, in seconds (default: 60)
    #[serde(default = "default_sync_lag_secs")]
    pub sync_lag_secs: u32,
}

fn default_max_batch_size() -> usize { 100 }
fn default_flush_interval_ms() -> u64 { 60_000 }
fn default_skew_tolerance_secs() -> u32 { 60 }
fn default_sync_lookback_secs() -> u32 { 300 }
fn default_sync_lag_secs() -> u32 { 60 }

impl CollectorConfig {
    /// Flush interval as a [`Duration`].
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            skew_tolerance_secs: default_skew_tolerance_secs(),
            sync_lookback_secs: default_sync_lookback_secs(),
            sync_lag_secs: default_sync_lag_secs(),
        }
    }
}
