//! Batched store adapter configuration.

use serde::{Deserialize, Serialize};

/// Flush timing, queue bounds, and retry knobs for the batched adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seconds between timed flushes.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,
    /// Queue length that triggers an early flush.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Bound on the enqueue channel; full means brief caller backpressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Flush attempts per operation before dead-lettering.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Retry backoff base in milliseconds.
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,
    /// Retry backoff cap in milliseconds.
    #[serde(default = "default_retry_cap")]
    pub retry_cap_ms: u64,
    /// Checkpoint read-through cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Checkpoint read-through cache capacity.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_interval_seconds: default_flush_interval(),
            max_batch_size: default_max_batch_size(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base(),
            retry_cap_ms: default_retry_cap(),
            cache_ttl_seconds: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_flush_interval() -> u64 {
    300
}

fn default_max_batch_size() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base() -> u64 {
    1000
}

fn default_retry_cap() -> u64 {
    10_000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    1000
}
