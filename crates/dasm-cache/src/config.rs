use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::ring::MIN_RING_SIZE;

/// Tuning knobs for the cache.
///
/// All fields have production defaults; embedders typically deserialize
/// this from their service configuration file and only tests shrink the
/// thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of index slots.
    pub slots_count: usize,

    /// Number of decode worker threads.
    pub workers: usize,

    /// Capacity in bytes of the requester-to-worker ring.
    pub ring_size: usize,

    /// Wall-clock idle time after which an unreferenced entry may be
    /// evicted.
    #[serde(with = "humantime_serde")]
    pub evict_idle_for: Duration,

    /// User-clock idle ticks after which an unreferenced entry may be
    /// evicted.
    pub evict_idle_user_clocks: u64,

    /// Wall-clock pause between re-decode requests for a stale entry.
    #[serde(with = "humantime_serde")]
    pub retry_stale_after: Duration,

    /// User-clock pause between re-decode requests for a stale entry.
    pub retry_stale_user_clocks: u64,

    /// Pause between evictor sweeps.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// How long a decode waits for the text service to produce a source
    /// line before dropping the annotation.
    #[serde(with = "humantime_serde")]
    pub line_text_patience: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            slots_count: 1024,
            workers: 1,
            ring_size: MIN_RING_SIZE,
            evict_idle_for: Duration::from_secs(10),
            evict_idle_user_clocks: 10,
            retry_stale_after: Duration::from_secs(1),
            retry_stale_user_clocks: 10,
            sweep_interval: Duration::from_millis(100),
            line_text_patience: Duration::from_millis(5),
        }
    }
}

impl CacheConfig {
    /// Loads a configuration from a YAML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        serde_yaml::from_str(&source).context("failed to parse YAML configuration")
    }

    /// Stripes shared by the slots: one per logical CPU, capped at the
    /// slot count.
    pub(crate) fn stripes_count(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        self.slots_count.min(cpus)
    }
}
